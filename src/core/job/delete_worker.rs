// src/core/job/delete_worker.rs

//! `DeleteWorkerJob(worker, permanentDelete)` (§4.4.6): evicts one worker.

use super::find_all::run_find_all_job;
use super::replicate::run_replicate_job;
use super::{Job, JobExtendedState, JobKind};
use crate::config::ConfigurationStore;
use crate::core::chunker::DUMMY_CHUNK_ID;
use crate::core::db_cache::DbServicesCache;
use crate::core::errors::ControlPlaneError;
use crate::core::locker::ChunkLocker;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct DeleteWorkerResult {
    pub orphan_chunks: Vec<i32>,
    pub all_replicate_jobs_succeeded: bool,
}

pub async fn run_delete_worker_job(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    locker: &ChunkLocker,
    transport: &Arc<dyn WorkerTransport>,
    worker_name: &str,
    permanent_delete: bool,
) -> Result<DeleteWorkerResult, ControlPlaneError> {
    job.set_in_progress();
    let mut result = DeleteWorkerResult::default();

    // Step 1: status probe with a bounded wait; if running, drain and do a
    // best-effort FindAllReplicas sweep whose outcome is informational only.
    if let Ok(worker) = config.worker(worker_name) {
        let status_request = Request::new(job.id, worker_name.to_string(), RequestKind::ServiceStatus, Duration::from_secs(60));
        let running = status_request.execute(&worker, transport, true).await.is_ok();
        if running {
            let drain_request = Request::new(job.id, worker_name.to_string(), RequestKind::ServiceDrain, Duration::from_secs(60));
            let _ = drain_request.execute(&worker, transport, true).await;

            for database in config.all_families().iter().flat_map(|f| config.databases_in_family(&f.name)) {
                let find_request = Request::new(
                    job.id,
                    worker_name.to_string(),
                    RequestKind::FindAllReplicas { database: database.name.clone() },
                    Duration::from_secs(60),
                );
                // Completion status is informational only (§4.4.6 step 1c).
                let _ = find_request.execute(&worker, transport, true).await;
            }
        }
    }

    // Step 2: disable the worker in configuration.
    config.disable_worker(worker_name)?;
    info!(worker = worker_name, "worker disabled, beginning eviction");

    let families = config.all_families();

    // Step 3: refresh the replica view per family, excluding this worker
    // (it is now disabled, so FindAllJob's default worker selection skips
    // it automatically).
    for family in &families {
        let find_all_job = Job::new(JobKind::FindAll, job.priority, Some(job.id));
        if let Err(e) = run_find_all_job(&find_all_job, config, db_cache, transport, &family.name, true, false).await {
            warn!(family = %family.name, error = %e, "delete-worker: find-all refresh failed");
        }
    }

    // Step 4: restore replication level for every family.
    let mut all_succeeded = true;
    for family in &families {
        let replicate_job = Job::new(JobKind::Replicate, job.priority, Some(job.id));
        match run_replicate_job(
            &replicate_job,
            config,
            db_cache,
            locker,
            transport,
            &family.name,
            family.min_replication_level,
        )
        .await
        {
            Ok(replicate_result) => {
                if !replicate_result.chunks_without_destination.is_empty()
                    || !replicate_result.chunks_failed_to_lock.is_empty()
                {
                    all_succeeded = false;
                }
            }
            Err(e) => {
                warn!(family = %family.name, error = %e, "delete-worker: replicate job failed");
                all_succeeded = false;
            }
        }
    }

    // Step 5: any chunk still uniquely on this worker is orphaned.
    if all_succeeded {
        let mut orphans = std::collections::BTreeSet::new();
        for family in &families {
            for database in config.databases_in_family(&family.name) {
                for replica in db_cache.replicas_for_worker(worker_name) {
                    if replica.database != database.name || replica.chunk == DUMMY_CHUNK_ID {
                        continue;
                    }
                    let other_holders = db_cache
                        .replicas_for_chunk(&database.name, replica.chunk)
                        .into_iter()
                        .filter(|r| r.worker != worker_name)
                        .count();
                    if other_holders == 0 {
                        orphans.insert(replica.chunk);
                    }
                }
            }
        }
        result.orphan_chunks = orphans.into_iter().collect();

        if permanent_delete {
            config.remove_worker(worker_name)?;
        }
    }

    result.all_replicate_jobs_succeeded = all_succeeded;
    job.finish(if all_succeeded { JobExtendedState::Success } else { JobExtendedState::Failed });
    Ok(result)
}
