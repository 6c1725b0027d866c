// src/core/job/fixup.rs

//! `FixUpJob(family)` (§4.4.5): repairs collocation without changing
//! replica counts — for a chunk present (with a good replica) on worker
//! `w` in some database of the family, every other database of the family
//! that also hosts the chunk should have a complete replica on `w` too.

use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::chunker::DUMMY_CHUNK_ID;
use crate::core::db_cache::{DbServicesCache, ReplicaStatus};
use crate::core::errors::ControlPlaneError;
use crate::core::locker::ChunkLocker;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default, Clone)]
pub struct FixUpJobResult {
    pub chunks_repaired: Vec<i32>,
    pub chunks_failed_to_lock: Vec<i32>,
}

pub async fn run_fixup_job(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    locker: &ChunkLocker,
    transport: &Arc<dyn WorkerTransport>,
    family: &str,
) -> Result<FixUpJobResult, ControlPlaneError> {
    job.set_in_progress();
    let databases: Vec<String> = config.databases_in_family(family).into_iter().map(|d| d.name).collect();
    let timeout = Duration::from_secs(config.controller_request_timeout_sec());
    let mut result = FixUpJobResult::default();

    // workers_by_chunk_and_db[chunk][database] -> { workers with COMPLETE replica }
    let mut workers_by_chunk_and_db: BTreeMap<i32, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
    for database in &databases {
        for replica in db_cache.replicas_for_database(database) {
            if replica.chunk == DUMMY_CHUNK_ID || replica.status != ReplicaStatus::Complete {
                continue;
            }
            workers_by_chunk_and_db
                .entry(replica.chunk)
                .or_default()
                .entry(database.clone())
                .or_default()
                .insert(replica.worker);
        }
    }

    for (chunk, by_db) in workers_by_chunk_and_db {
        if job.is_cancel_requested() {
            job.finish(JobExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }
        let expected_workers: BTreeSet<String> = by_db.values().flat_map(|s| s.iter().cloned()).collect();

        let mut missing: Vec<(String, String)> = Vec::new();
        for database in &databases {
            let present = by_db.get(database).cloned().unwrap_or_default();
            if present.is_empty() {
                // This database doesn't host the chunk at all; nothing to
                // fix up for it.
                continue;
            }
            for worker in &expected_workers {
                if !present.contains(worker) {
                    missing.push((database.clone(), worker.clone()));
                }
            }
        }
        if missing.is_empty() {
            continue;
        }
        if !locker.lock(family, chunk, job.id) {
            result.chunks_failed_to_lock.push(chunk);
            continue;
        }

        for (database, dest) in missing {
            let Some(source) = by_db.get(&database).and_then(|s| s.iter().next()).cloned() else {
                continue;
            };
            let Ok(dest_worker) = config.worker(&dest) else { continue };
            let request = Request::new(
                job.id,
                dest.clone(),
                RequestKind::ReplicateChunk { source_worker: source, database, chunk },
                timeout,
            );
            if let Err(e) = request.execute(&dest_worker, transport, false).await {
                warn!(chunk, worker = %dest, error = %e, "fixup: replicate-chunk failed");
            }
        }
        locker.release(family, chunk);
        result.chunks_repaired.push(chunk);
    }

    job.finish(JobExtendedState::Success);
    Ok(result)
}
