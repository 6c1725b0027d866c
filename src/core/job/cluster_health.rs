// src/core/job/cluster_health.rs

//! `ClusterHealthJob(probeTimeoutSec)` (§4.4.7).

use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::errors::ControlPlaneError;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Default, Clone)]
pub struct ClusterHealthResult {
    pub qserv_responded: BTreeMap<String, bool>,
    pub replication_responded: BTreeMap<String, bool>,
}

/// Probes every worker's Qserv and Replication services concurrently,
/// bounding each probe by `probe_timeout`. A worker that does not respond
/// within the bound is reported `false`, never an error: non-response is
/// the expected, normal outcome this job exists to measure.
pub async fn run_cluster_health_job(
    job: &Job,
    config: &ConfigurationStore,
    transport: &Arc<dyn WorkerTransport>,
    probe_timeout: Duration,
) -> Result<ClusterHealthResult, ControlPlaneError> {
    job.set_in_progress();
    let workers = config.all_workers();
    let mut result = ClusterHealthResult::default();

    let mut set: JoinSet<(String, &'static str, bool)> = JoinSet::new();
    for worker in &workers {
        for (service, kind) in [("qserv", RequestKind::ServiceStatus), ("replication", RequestKind::ServiceStatus)] {
            let transport = Arc::clone(transport);
            let worker = worker.clone();
            let job_id = job.id;
            let timeout = probe_timeout;
            set.spawn(async move {
                let request = Request::new(job_id, worker.name.clone(), kind, timeout);
                let ok = request.execute(&worker, &transport, true).await.is_ok();
                (worker.name, service, ok)
            });
        }
    }

    while let Some(joined) = set.join_next().await {
        let (worker_name, service, ok) = joined.map_err(|e| ControlPlaneError::internal(e.to_string()))?;
        match service {
            "qserv" => {
                result.qserv_responded.insert(worker_name, ok);
            }
            _ => {
                result.replication_responded.insert(worker_name, ok);
            }
        }
    }

    job.finish(JobExtendedState::Success);
    Ok(result)
}
