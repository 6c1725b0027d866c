// src/core/job/mod.rs

//! The Job Layer (C4): multi-request operations with their own state
//! machines. As with [`crate::core::request`], the source's three-level
//! job class hierarchy collapses into one [`Job`] struct carrying a tagged
//! [`JobKind`] (§9); shared behaviour (state transitions, the chunk
//! locker, cascading cancellation) lives here, per-kind planning lives in
//! the sibling modules.

mod cluster_health;
mod delete_worker;
mod find_all;
mod fixup;
pub(crate) mod planning;
mod purge;
mod qserv_sync;
mod rebalance;
mod replicate;
mod sql;

pub use cluster_health::{run_cluster_health_job, ClusterHealthResult};
pub use delete_worker::{run_delete_worker_job, DeleteWorkerResult};
pub use find_all::{run_find_all_job, FindAllJobResult};
pub use fixup::{run_fixup_job, FixUpJobResult};
pub use planning::{build_planning_view, least_loaded_destination, ChunkPlanningView};
pub use purge::{run_purge_job, PurgeJobResult};
pub use qserv_sync::run_qserv_sync;
pub use rebalance::{run_rebalance_job, RebalancePlan};
pub use replicate::{run_replicate_job, ReplicateJobResult};
pub use sql::{chunks_per_worker, physical_table_names, run_sql_job, SqlBroadcastResult, SqlOperation};

use crate::core::metrics::{JOBS_FINISHED_TOTAL, JOBS_LAUNCHED_TOTAL};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Canonical job lifecycle: `CREATED -> IN_PROGRESS -> FINISHED(ext)` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    InProgress,
    Finished(JobExtendedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobExtendedState {
    Success,
    Failed,
    Cancelled,
    Timeout,
    ConfigError,
}

/// Job kind tags, matching §2/§4.4's named job list one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    FindAll,
    Replicate,
    Purge,
    Rebalance,
    FixUp,
    DeleteWorker,
    QservSync,
    ClusterHealth,
    Sql,
}

/// Shared job bookkeeping: priority, parent linkage, and the cooperative
/// cancellation flag every suspension point re-checks (§5, §9).
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub priority: i32,
    pub parent_job_id: Option<Uuid>,
    state: std::sync::Mutex<JobState>,
    cancel_requested: AtomicBool,
}

impl Job {
    pub fn new(kind: JobKind, priority: i32, parent_job_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            parent_job_id,
            state: std::sync::Mutex::new(JobState::Created),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    pub fn set_in_progress(&self) {
        *self.state.lock().unwrap() = JobState::InProgress;
        JOBS_LAUNCHED_TOTAL.with_label_values(&[&format!("{:?}", self.kind)]).inc();
    }

    pub fn finish(&self, ext: JobExtendedState) {
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, JobState::Finished(_)) {
            *state = JobState::Finished(ext);
            JOBS_FINISHED_TOTAL
                .with_label_values(&[&format!("{:?}", self.kind), &format!("{:?}", ext)])
                .inc();
        }
    }

    /// Cascading cancellation (§4.4): marks the job cancelled; callers
    /// holding the job's child requests are responsible for cancelling
    /// each of them in turn.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.finish(JobExtendedState::Cancelled);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}
