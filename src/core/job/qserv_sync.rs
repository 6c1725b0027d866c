// src/core/job/qserv_sync.rs

//! `QservSync`, the barrier job run after every replication-loop phase
//! (§4.6). Not broken out as its own numbered subsection in the
//! distilled spec, but named throughout §4.6/§4.7/§4.8's flows; documented
//! here as a full, first-class job.
//!
//! Publishes the database-services cache's current view of each database's
//! hosted chunks to every enabled worker via `SetChunkList`, so the Qserv
//! query layer's xrootd-side chunk directory stays in sync with what the
//! control plane believes is replicated. Any worker failure fails the job
//! (§7: FindAll/QservSync both treat any worker failure as a job failure).

use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::db_cache::DbServicesCache;
use crate::core::errors::ControlPlaneError;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use std::sync::Arc;
use std::time::Duration;

pub async fn run_qserv_sync(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    transport: &Arc<dyn WorkerTransport>,
    family: &str,
    timeout: Duration,
) -> Result<(), ControlPlaneError> {
    job.set_in_progress();
    let databases: Vec<String> = config.databases_in_family(family).into_iter().map(|d| d.name).collect();
    let workers = config.all_workers();

    for worker in &workers {
        if job.is_cancel_requested() {
            job.finish(JobExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }
        let mut chunks = Vec::new();
        for database in &databases {
            for replica in db_cache.replicas_for_worker(&worker.name) {
                if replica.database == *database {
                    chunks.push((database.clone(), replica.chunk));
                }
            }
        }
        let request = Request::new(
            job.id,
            worker.name.clone(),
            RequestKind::SetChunkList { chunks, force: true, databases: databases.clone() },
            timeout,
        );
        if let Err(e) = request.execute(worker, transport, false).await {
            job.finish(JobExtendedState::Failed);
            return Err(e);
        }
    }

    job.finish(JobExtendedState::Success);
    Ok(())
}
