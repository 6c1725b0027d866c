// src/core/job/rebalance.rs

//! `RebalanceJob(family, estimateOnly)` (§4.4.4): moves individual
//! replicas from the most-loaded worker holding a chunk to the
//! least-loaded writable worker not yet holding it, one `(ReplicateChunk,
//! DeleteReplica)` pair per move, until occupancy is balanced within one
//! chunk's worth across all writable workers.

use super::planning::build_planning_view;
use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::db_cache::DbServicesCache;
use crate::core::errors::ControlPlaneError;
use crate::core::locker::ChunkLocker;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PlannedMove {
    pub chunk: i32,
    pub from_worker: String,
    pub to_worker: String,
}

#[derive(Debug, Default, Clone)]
pub struct RebalancePlan {
    pub moves: Vec<PlannedMove>,
    pub executed: bool,
}

pub async fn run_rebalance_job(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    locker: &ChunkLocker,
    transport: &Arc<dyn WorkerTransport>,
    family: &str,
    estimate_only: bool,
) -> Result<RebalancePlan, ControlPlaneError> {
    job.set_in_progress();
    let view = build_planning_view(config, db_cache, family);
    let writable = config.workers(true, false);
    if writable.len() < 2 {
        job.finish(JobExtendedState::Success);
        return Ok(RebalancePlan::default());
    }

    let mut occupancy: BTreeMap<String, i64> = writable
        .iter()
        .map(|w| (w.clone(), db_cache.occupancy(w) as i64))
        .collect();

    let mut plan = RebalancePlan::default();
    let chunks: Vec<i32> = view.good_workers.keys().copied().collect();

    for chunk in chunks {
        let holders = view.good_workers.get(&chunk).cloned().unwrap_or_default();
        loop {
            let Some(most_loaded) = holders
                .iter()
                .filter(|w| writable.contains(w))
                .max_by_key(|w| occupancy.get(*w).copied().unwrap_or(0))
                .cloned()
            else {
                break;
            };
            let Some(least_loaded) = writable
                .iter()
                .filter(|w| !holders.contains(*w))
                .min_by_key(|w| occupancy.get(*w).copied().unwrap_or(0))
                .cloned()
            else {
                break;
            };
            let imbalance = occupancy.get(&most_loaded).copied().unwrap_or(0)
                - occupancy.get(&least_loaded).copied().unwrap_or(0);
            if imbalance < 2 {
                break;
            }
            plan.moves.push(PlannedMove {
                chunk,
                from_worker: most_loaded.clone(),
                to_worker: least_loaded.clone(),
            });
            *occupancy.entry(most_loaded).or_insert(0) -= 1;
            *occupancy.entry(least_loaded).or_insert(0) += 1;
            // A single chunk is moved at most once per pass to bound the
            // per-iteration cost of this greedy heuristic.
            break;
        }
    }

    if estimate_only {
        job.finish(JobExtendedState::Success);
        return Ok(plan);
    }

    let timeout = Duration::from_secs(config.controller_request_timeout_sec());
    for mv in &plan.moves {
        if job.is_cancel_requested() {
            job.finish(JobExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }
        if !locker.lock(family, mv.chunk, job.id) {
            continue;
        }
        let Ok(dest_worker) = config.worker(&mv.to_worker) else {
            locker.release(family, mv.chunk);
            continue;
        };
        let Ok(source_worker) = config.worker(&mv.from_worker) else {
            locker.release(family, mv.chunk);
            continue;
        };
        for database in &view.databases {
            let replicate = Request::new(
                job.id,
                mv.to_worker.clone(),
                RequestKind::ReplicateChunk {
                    source_worker: mv.from_worker.clone(),
                    database: database.clone(),
                    chunk: mv.chunk,
                },
                timeout,
            );
            if let Err(e) = replicate.execute(&dest_worker, transport, false).await {
                warn!(chunk = mv.chunk, error = %e, "rebalance: replicate leg failed, skipping delete leg");
                continue;
            }
            let delete = Request::new(
                job.id,
                mv.from_worker.clone(),
                RequestKind::DeleteReplica { database: database.clone(), chunk: mv.chunk },
                timeout,
            );
            match delete.execute(&source_worker, transport, false).await {
                Ok(_) => {
                    db_cache.remove_replica(database, mv.chunk, &mv.from_worker);
                }
                Err(e) => warn!(chunk = mv.chunk, error = %e, "rebalance: delete leg failed"),
            };
        }
        locker.release(family, mv.chunk);
    }
    plan.executed = true;

    job.finish(JobExtendedState::Success);
    Ok(plan)
}
