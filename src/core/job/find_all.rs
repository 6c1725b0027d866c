// src/core/job/find_all.rs

//! `FindAllJob(family, saveReplicaInfo, allWorkers)` (§4.4.1).

use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::chunker::DUMMY_CHUNK_ID;
use crate::core::db_cache::{DbServicesCache, ReplicaInfo, ReplicaStatus};
use crate::core::errors::ControlPlaneError;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default, Clone)]
pub struct FindAllJobResult {
    /// `replicas[database][(chunk, worker)] -> ReplicaInfo`.
    pub replicas: BTreeMap<String, BTreeMap<(i32, String), ReplicaInfo>>,
    pub is_complete: BTreeMap<(i32, String), bool>,
    pub is_colocated: BTreeMap<(i32, String), bool>,
    pub is_good: BTreeMap<(i32, String), bool>,
    pub databases_per_chunk: BTreeMap<i32, BTreeSet<String>>,
}

fn parse_worker_status(s: &str) -> ReplicaStatus {
    match s {
        "COMPLETE" => ReplicaStatus::Complete,
        "CORRUPT" => ReplicaStatus::Corrupt,
        _ => ReplicaStatus::Incomplete,
    }
}

pub async fn run_find_all_job(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    transport: &Arc<dyn WorkerTransport>,
    family: &str,
    save_replica_info: bool,
    all_workers: bool,
) -> Result<FindAllJobResult, ControlPlaneError> {
    job.set_in_progress();
    let databases = config.databases_in_family(family);
    if databases.is_empty() {
        job.finish(JobExtendedState::Success);
        return Ok(FindAllJobResult::default());
    }

    let worker_names: Vec<String> = if all_workers {
        config.all_workers().into_iter().map(|w| w.name).collect()
    } else {
        let mut names = config.workers(true, false);
        names.extend(config.workers(true, true));
        names
    };

    let timeout = Duration::from_secs(config.controller_request_timeout_sec());
    let mut result = FindAllJobResult::default();
    let mut any_failed = false;

    for database in &databases {
        let mut per_database = BTreeMap::new();
        for worker_name in &worker_names {
            if job.is_cancel_requested() {
                job.finish(JobExtendedState::Cancelled);
                return Err(ControlPlaneError::Cancelled);
            }
            let worker = match config.worker(worker_name) {
                Ok(w) => w,
                Err(_) => continue,
            };
            let request = Request::new(
                job.id,
                worker_name.clone(),
                RequestKind::FindAllReplicas { database: database.name.clone() },
                timeout,
            );
            match request.execute(&worker, transport, all_workers).await {
                Ok(outcome) => {
                    let Some(items) = outcome.body.get("replicas").and_then(|v| v.as_array()) else {
                        continue;
                    };
                    for item in items {
                        let chunk = item.get("chunk").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
                        if chunk == DUMMY_CHUNK_ID {
                            continue;
                        }
                        let status = item
                            .get("status")
                            .and_then(|v| v.as_str())
                            .map(parse_worker_status)
                            .unwrap_or(ReplicaStatus::Incomplete);
                        let size_bytes = item.get("size_bytes").and_then(|v| v.as_u64()).unwrap_or(0);
                        let info = ReplicaInfo {
                            database: database.name.clone(),
                            chunk,
                            worker: worker_name.clone(),
                            status,
                            verify_time: Utc::now(),
                            size_bytes,
                        };
                        if save_replica_info {
                            db_cache.upsert_replica(info.clone());
                        }
                        per_database.insert((chunk, worker_name.clone()), info);
                        result
                            .databases_per_chunk
                            .entry(chunk)
                            .or_default()
                            .insert(database.name.clone());
                    }
                }
                Err(e) => {
                    // FindAll treats any worker failure as a job failure
                    // (§7): downstream correctness depends on having
                    // consulted every worker.
                    warn!(worker = %worker_name, error = %e, "find-all request failed");
                    any_failed = true;
                }
            }
        }
        result.replicas.insert(database.name.clone(), per_database);
    }

    if any_failed {
        job.finish(JobExtendedState::Failed);
        return Err(ControlPlaneError::internal("find-all job: one or more workers failed to respond"));
    }

    // isComplete / isColocated / isGood, computed per (chunk, worker) across
    // every database of the family (§4.4.1).
    let mut chunks_with_any_replica: BTreeSet<i32> = BTreeSet::new();
    for per_database in result.replicas.values() {
        for (chunk, _) in per_database.keys() {
            chunks_with_any_replica.insert(*chunk);
        }
    }
    let all_workers_seen: BTreeSet<String> = result
        .replicas
        .values()
        .flat_map(|m| m.keys().map(|(_, w)| w.clone()))
        .collect();

    for chunk in chunks_with_any_replica {
        let expected_databases = result.databases_per_chunk.get(&chunk).cloned().unwrap_or_default();
        for worker in &all_workers_seen {
            let mut complete = true;
            let mut colocated = true;
            for database in &expected_databases {
                match result
                    .replicas
                    .get(database)
                    .and_then(|m| m.get(&(chunk, worker.clone())))
                {
                    Some(info) => {
                        if info.status != ReplicaStatus::Complete {
                            complete = false;
                        }
                    }
                    None => {
                        colocated = false;
                        complete = false;
                    }
                }
            }
            result.is_complete.insert((chunk, worker.clone()), complete);
            result.is_colocated.insert((chunk, worker.clone()), colocated);
            result
                .is_good
                .insert((chunk, worker.clone()), complete && colocated);
        }
    }

    job.finish(JobExtendedState::Success);
    Ok(result)
}
