// src/core/job/purge.rs

//! `PurgeJob(family, numReplicas)` (§4.4.3): the inverse of `ReplicateJob`.
//! Restart semantics resolve Open Question 2 (SPEC_FULL.md §9 Decisions):
//! `_numFinished`, `numFailedLocks`, and the per-chunk job/lock bookkeeping
//! all reset together, atomically, at the top of each wave.

use super::planning::build_planning_view;
use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::db_cache::DbServicesCache;
use crate::core::errors::ControlPlaneError;
use crate::core::locker::ChunkLocker;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Default, Clone)]
pub struct PurgeJobResult {
    pub num_finished: u32,
    pub num_failed_locks: u32,
    pub chunks_purged: Vec<i32>,
}

pub async fn run_purge_job(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    locker: &ChunkLocker,
    transport: &Arc<dyn WorkerTransport>,
    family: &str,
    num_replicas: u32,
) -> Result<PurgeJobResult, ControlPlaneError> {
    job.set_in_progress();
    if num_replicas == 0 {
        job.finish(JobExtendedState::ConfigError);
        return Err(ControlPlaneError::InvalidArgument(
            "replicationLevel must be > 0 for PurgeJob".to_string(),
        ));
    }

    let timeout = Duration::from_secs(config.controller_request_timeout_sec());
    let mut result = PurgeJobResult::default();

    loop {
        if job.is_cancel_requested() {
            job.finish(JobExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }

        // Atomic per-wave reset (Open Question 2 decision): a fresh
        // planning view and a fresh wave-local occupancy snapshot every
        // restart, no leaked state from the previous wave.
        let view = build_planning_view(config, db_cache, family);
        let mut occupancy: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
        for worker in config.all_workers() {
            occupancy.insert(worker.name.clone(), db_cache.occupancy(&worker.name) as i64);
        }

        let excess: Vec<(i32, Vec<String>)> = view
            .good_workers
            .iter()
            .filter(|(_, workers)| (workers.len() as u32) > num_replicas)
            .map(|(chunk, workers)| (*chunk, workers.iter().cloned().collect()))
            .collect();

        let mut wave_failed_locks = 0u32;
        let mut wave_jobs_launched = 0u32;

        for (chunk, mut workers) in excess {
            if job.is_cancel_requested() {
                job.finish(JobExtendedState::Cancelled);
                return Err(ControlPlaneError::Cancelled);
            }
            if !locker.lock(family, chunk, job.id) {
                wave_failed_locks += 1;
                continue;
            }

            // Victim selection: highest chunk-count worker first,
            // decrementing its occupancy so later chunks in this wave see
            // the updated load (§4.4.3).
            workers.sort_by(|a, b| {
                occupancy
                    .get(b)
                    .unwrap_or(&0)
                    .cmp(occupancy.get(a).unwrap_or(&0))
                    .then_with(|| a.cmp(b))
            });
            let to_remove = workers.len() as u32 - num_replicas;
            let victims: Vec<String> = workers.into_iter().take(to_remove as usize).collect();

            for victim in &victims {
                let worker = match config.worker(victim) {
                    Ok(w) => w,
                    Err(e) => {
                        warn!(worker = %victim, error = %e, "purge: victim worker vanished, skipping");
                        continue;
                    }
                };
                // Only databases that actually host this chunk on this
                // victim count toward its occupancy (§4.4.3); `view.databases`
                // is every database in the family, which overcounts chunks
                // that aren't hosted everywhere.
                let mut removed = 0i64;
                for database in &view.databases {
                    if db_cache.replicas_for_chunk(database, chunk).iter().all(|r| r.worker != *victim) {
                        continue;
                    }
                    let request = Request::new(
                        job.id,
                        victim.clone(),
                        RequestKind::DeleteReplica { database: database.clone(), chunk },
                        timeout,
                    );
                    match request.execute(&worker, transport, false).await {
                        Ok(_) => {
                            if db_cache.remove_replica(database, chunk, victim) {
                                removed += 1;
                            }
                        }
                        Err(e) => warn!(chunk, worker = %victim, error = %e, "purge: delete-replica failed"),
                    }
                }
                *occupancy.entry(victim.clone()).or_insert(0) -= removed;
                wave_jobs_launched += 1;
            }

            locker.release(family, chunk);
            result.chunks_purged.push(chunk);
        }

        result.num_finished += wave_jobs_launched;
        result.num_failed_locks = wave_failed_locks;

        if wave_jobs_launched == 0 && wave_failed_locks == 0 {
            job.finish(JobExtendedState::Success);
            return Ok(result);
        }
        if wave_jobs_launched == 0 && wave_failed_locks > 0 {
            // Nothing progressed this wave but locks are contended; give
            // the holders a chance to finish before restarting.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
