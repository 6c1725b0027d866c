// src/core/job/replicate.rs

//! `ReplicateJob(family, numReplicas)` (§4.4.2).

use super::planning::{any_good_source, build_planning_view, least_loaded_destination};
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
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct ReplicateJobResult {
    pub chunks_replicated: Vec<i32>,
    pub chunks_failed_to_lock: Vec<i32>,
    pub chunks_without_destination: Vec<i32>,
}

pub async fn run_replicate_job(
    job: &Job,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    locker: &ChunkLocker,
    transport: &Arc<dyn WorkerTransport>,
    family: &str,
    num_replicas: u32,
) -> Result<ReplicateJobResult, ControlPlaneError> {
    job.set_in_progress();
    if num_replicas == 0 {
        job.finish(JobExtendedState::ConfigError);
        return Err(ControlPlaneError::InvalidArgument(
            "replicationLevel must be > 0".to_string(),
        ));
    }

    let view = build_planning_view(config, db_cache, family);
    let timeout = Duration::from_secs(config.controller_request_timeout_sec());
    let mut result = ReplicateJobResult::default();

    let deficient: Vec<i32> = view
        .good_workers
        .iter()
        .filter(|(_, workers)| (workers.len() as u32) < num_replicas)
        .map(|(chunk, _)| *chunk)
        .collect();

    for chunk in deficient {
        if job.is_cancel_requested() {
            job.finish(JobExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }
        if !locker.lock(family, chunk, job.id) {
            result.chunks_failed_to_lock.push(chunk);
            continue;
        }

        let outcome = replicate_one_chunk(job.id, config, db_cache, &view, transport, chunk, timeout).await;
        locker.release(family, chunk);
        match outcome {
            Ok(true) => result.chunks_replicated.push(chunk),
            Ok(false) => result.chunks_without_destination.push(chunk),
            Err(e) => {
                warn!(chunk, error = %e, "replicate: per-chunk failure, continuing (per-chunk independence)");
            }
        }
    }

    // ReplicateJob reports per-chunk failures rather than failing globally
    // (§7); it only fails outright on a config error, handled above.
    job.finish(JobExtendedState::Success);
    Ok(result)
}

async fn replicate_one_chunk(
    job_id: Uuid,
    config: &ConfigurationStore,
    db_cache: &DbServicesCache,
    view: &super::planning::ChunkPlanningView,
    transport: &Arc<dyn WorkerTransport>,
    chunk: i32,
    timeout: Duration,
) -> Result<bool, ControlPlaneError> {
    let Some(source) = any_good_source(view, chunk) else {
        return Ok(false);
    };
    let Some(destination) = least_loaded_destination(config, db_cache, chunk, view) else {
        return Ok(false);
    };
    let destination_worker = config.worker(&destination)?;

    for database in &view.databases {
        let request = Request::new(
            job_id,
            destination.clone(),
            RequestKind::ReplicateChunk {
                source_worker: source.clone(),
                database: database.clone(),
                chunk,
            },
            timeout,
        );
        request.execute(&destination_worker, transport, false).await?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Database, DatabaseFamily};
    use crate::core::db_cache::{ReplicaInfo, ReplicaStatus};
    use crate::config::Worker;
    use crate::core::protocol::{WorkerCommand, WorkerResponseFrame, WorkerResponseH, WorkerStatus};
    use async_trait::async_trait;
    use chrono::Utc;

    struct AlwaysSuccess;

    #[async_trait]
    impl WorkerTransport for AlwaysSuccess {
        async fn send(
            &self,
            _host: &str,
            _port: u16,
            _command: WorkerCommand,
            _body: serde_json::Value,
            _timeout: Duration,
        ) -> Result<WorkerResponseFrame, ControlPlaneError> {
            Ok(WorkerResponseFrame {
                header: WorkerResponseH {
                    status: WorkerStatus::Success,
                    request_id: Uuid::new_v4(),
                    error: String::new(),
                },
                body: serde_json::json!({}),
            })
        }
    }

    fn make_worker(name: &str) -> Worker {
        Worker {
            name: name.to_string(),
            is_enabled: true,
            is_read_only: false,
            svc_host: name.to_string(),
            svc_port: 1,
            fs_host: name.to_string(),
            fs_port: 2,
            loader_host: name.to_string(),
            loader_port: 3,
            db_host: name.to_string(),
            db_port: 4,
            db_user: "qsreplica".to_string(),
            data_dir: "/data/{worker}".to_string(),
        }
    }

    #[tokio::test]
    async fn s1_replicate_to_target() {
        let config = ConfigurationStore::in_memory();
        config
            .add_database_family(DatabaseFamily {
                name: "layout_340_12".to_string(),
                min_replication_level: 2,
                num_stripes: 340,
                num_sub_stripes: 12,
                overlap: 0.01667,
            })
            .unwrap();
        config
            .add_database(Database {
                name: "d1".to_string(),
                family: "layout_340_12".to_string(),
                is_published: true,
                partitioned_tables: vec![],
                regular_tables: vec![],
            })
            .unwrap();
        for name in ["A", "B", "C"] {
            config.add_worker(make_worker(name)).unwrap();
        }

        let db_cache = DbServicesCache::new();
        db_cache.upsert_replica(ReplicaInfo {
            database: "d1".to_string(),
            chunk: 7,
            worker: "A".to_string(),
            status: ReplicaStatus::Complete,
            verify_time: Utc::now(),
            size_bytes: 0,
        });

        let locker = ChunkLocker::new();
        let transport: Arc<dyn WorkerTransport> = Arc::new(AlwaysSuccess);
        let job = Job::new(super::super::JobKind::Replicate, 0, None);
        let result = run_replicate_job(&job, &config, &db_cache, &locker, &transport, "layout_340_12", 2)
            .await
            .unwrap();
        assert_eq!(result.chunks_replicated, vec![7]);
        assert!(!locker.is_locked("layout_340_12", 7));
    }
}
