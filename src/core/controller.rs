// src/core/controller.rs

//! The Controller (C5): the shared context object threaded through every
//! job and request constructor, per §9's "Global state" guidance — no
//! static singletons, so tests can instantiate multiple controllers
//! in-process.

use crate::config::ConfigurationStore;
use crate::core::db_cache::DbServicesCache;
use crate::core::errors::ControlPlaneError;
use crate::core::job::{
    self, ClusterHealthResult, DeleteWorkerResult, FindAllJobResult, FixUpJobResult, Job, JobKind,
    PurgeJobResult, RebalancePlan, ReplicateJobResult, SqlBroadcastResult, SqlOperation,
};
use crate::core::locker::ChunkLocker;
use crate::core::protocol::WorkerTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Owns the Configuration Store, the worker request-sending facility, a
/// bounded task pool, a per-job id generator, and the database-services
/// cache (§4.5). Exposes typed factory methods per job kind; scheduling
/// policy (when to run what) belongs to the replication loop and health
/// monitor, not here.
pub struct Controller {
    pub config: Arc<ConfigurationStore>,
    pub db_cache: Arc<DbServicesCache>,
    pub locker: Arc<ChunkLocker>,
    pub transport: Arc<dyn WorkerTransport>,
    /// Bounds the number of jobs concurrently issuing worker requests,
    /// sized from `controller.num_threads` (§5).
    job_pool: Arc<Semaphore>,
    jobs_launched: AtomicU64,
}

impl Controller {
    pub fn new(config: Arc<ConfigurationStore>, transport: Arc<dyn WorkerTransport>) -> Self {
        Self {
            job_pool: Arc::new(Semaphore::new(16)),
            config,
            db_cache: Arc::new(DbServicesCache::new()),
            locker: Arc::new(ChunkLocker::new()),
            transport,
            jobs_launched: AtomicU64::new(0),
        }
    }

    pub fn jobs_launched(&self) -> u64 {
        self.jobs_launched.load(Ordering::Relaxed)
    }

    fn next_job(&self, kind: JobKind, parent: Option<uuid::Uuid>) -> Job {
        self.jobs_launched.fetch_add(1, Ordering::Relaxed);
        Job::new(kind, 0, parent)
    }

    async fn permit(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.job_pool.acquire().await.expect("job pool semaphore is never closed")
    }

    pub async fn find_all(
        &self,
        family: &str,
        save_replica_info: bool,
        all_workers: bool,
    ) -> Result<FindAllJobResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::FindAll, None);
        job::run_find_all_job(&j, &self.config, &self.db_cache, &self.transport, family, save_replica_info, all_workers)
            .await
    }

    pub async fn replicate(&self, family: &str, num_replicas: u32) -> Result<ReplicateJobResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::Replicate, None);
        job::run_replicate_job(&j, &self.config, &self.db_cache, &self.locker, &self.transport, family, num_replicas).await
    }

    pub async fn purge(&self, family: &str, num_replicas: u32) -> Result<PurgeJobResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::Purge, None);
        job::run_purge_job(&j, &self.config, &self.db_cache, &self.locker, &self.transport, family, num_replicas).await
    }

    pub async fn fixup(&self, family: &str) -> Result<FixUpJobResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::FixUp, None);
        job::run_fixup_job(&j, &self.config, &self.db_cache, &self.locker, &self.transport, family).await
    }

    pub async fn rebalance(&self, family: &str, estimate_only: bool) -> Result<RebalancePlan, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::Rebalance, None);
        job::run_rebalance_job(&j, &self.config, &self.db_cache, &self.locker, &self.transport, family, estimate_only).await
    }

    pub async fn qserv_sync(&self, family: &str, timeout: Duration) -> Result<(), ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::QservSync, None);
        job::run_qserv_sync(&j, &self.config, &self.db_cache, &self.transport, family, timeout).await
    }

    pub async fn delete_worker(&self, worker: &str, permanent_delete: bool) -> Result<DeleteWorkerResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::DeleteWorker, None);
        job::run_delete_worker_job(&j, &self.config, &self.db_cache, &self.locker, &self.transport, worker, permanent_delete).await
    }

    pub async fn cluster_health(&self, probe_timeout: Duration) -> Result<ClusterHealthResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::ClusterHealth, None);
        job::run_cluster_health_job(&j, &self.config, &self.transport, probe_timeout).await
    }

    pub async fn sql(
        &self,
        worker_names: &[String],
        operation: SqlOperation,
        payload: serde_json::Value,
    ) -> Result<SqlBroadcastResult, ControlPlaneError> {
        let _permit = self.permit().await;
        let j = self.next_job(JobKind::Sql, None);
        job::run_sql_job(&j, &self.config, &self.transport, worker_names, operation, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{WorkerCommand, WorkerResponseFrame, WorkerResponseH, WorkerStatus};
    use async_trait::async_trait;

    struct Empty;

    #[async_trait]
    impl WorkerTransport for Empty {
        async fn send(
            &self,
            _host: &str,
            _port: u16,
            _command: WorkerCommand,
            _body: serde_json::Value,
            _timeout: Duration,
        ) -> Result<WorkerResponseFrame, ControlPlaneError> {
            Ok(WorkerResponseFrame {
                header: WorkerResponseH { status: WorkerStatus::Success, request_id: uuid::Uuid::new_v4(), error: String::new() },
                body: serde_json::json!({"replicas": []}),
            })
        }
    }

    #[tokio::test]
    async fn find_all_on_family_with_no_databases_succeeds_trivially() {
        let config = Arc::new(ConfigurationStore::in_memory());
        let controller = Controller::new(config, Arc::new(Empty));
        let result = controller.find_all("nonexistent", false, false).await.unwrap();
        assert!(result.replicas.is_empty());
        assert_eq!(controller.jobs_launched(), 1);
    }
}
