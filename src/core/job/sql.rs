// src/core/job/sql.rs

//! `Sql*` jobs (§4.4.8): broadcast a named schema/metadata operation to a
//! selected worker set, batched so that no worker receives more than
//! `workerNumProcessingThreads` table names in one request.

use super::{Job, JobExtendedState};
use crate::config::ConfigurationStore;
use crate::core::chunker::DUMMY_CHUNK_ID;
use crate::core::db_cache::DbServicesCache;
use crate::core::errors::ControlPlaneError;
use crate::core::protocol::WorkerTransport;
use crate::core::request::{Request, RequestKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlOperation {
    CreateDb,
    DeleteDb,
    EnableDb,
    DisableDb,
    GrantAccess,
    CreateTables,
    DeleteTable,
    RemoveTablePartitions,
    RowStats,
    BuildEmptyChunksTable,
}

#[derive(Debug, Default, Clone)]
pub struct SqlBroadcastResult {
    pub workers_succeeded: Vec<String>,
    pub workers_failed: Vec<String>,
}

/// Computes the physical table set for a partitioned table hosted on one
/// worker: the prototype, `table_<chunk>` / `tableFullOverlap_<chunk>` for
/// every chunk the worker hosts, plus the dummy-chunk pair (§4.4.8).
pub fn physical_table_names(table: &str, hosted_chunks: &[i32]) -> Vec<String> {
    let mut names = vec![table.to_string()];
    for &chunk in hosted_chunks.iter().chain(std::iter::once(&DUMMY_CHUNK_ID)) {
        names.push(format!("{table}_{chunk}"));
        names.push(format!("{table}FullOverlap_{chunk}"));
    }
    names
}

/// Broadcasts `operation` to every worker in `worker_names`, batching table
/// names (when present in `payload["tables"]`) so no single request names
/// more tables than the worker's declared processing-thread bound.
pub async fn run_sql_job(
    job: &Job,
    config: &ConfigurationStore,
    transport: &Arc<dyn WorkerTransport>,
    worker_names: &[String],
    operation: SqlOperation,
    mut payload: serde_json::Value,
) -> Result<SqlBroadcastResult, ControlPlaneError> {
    job.set_in_progress();
    let timeout = Duration::from_secs(config.controller_request_timeout_sec());
    let mut result = SqlBroadcastResult::default();

    let tables: Vec<String> = payload
        .get("tables")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    for worker_name in worker_names {
        if job.is_cancel_requested() {
            job.finish(JobExtendedState::Cancelled);
            return Err(ControlPlaneError::Cancelled);
        }
        let Ok(worker) = config.worker(worker_name) else {
            result.workers_failed.push(worker_name.clone());
            continue;
        };
        let batch_size = config.worker_num_svc_processing_threads().max(1);
        let mut any_failed = false;
        if tables.is_empty() {
            let request = build_request(job.id, worker_name, operation, payload.clone(), timeout);
            if request.execute(&worker, transport, false).await.is_err() {
                any_failed = true;
            }
        } else {
            for batch in tables.chunks(batch_size) {
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("tables".to_string(), json!(batch));
                }
                let request = build_request(job.id, worker_name, operation, payload.clone(), timeout);
                if request.execute(&worker, transport, false).await.is_err() {
                    any_failed = true;
                    break;
                }
            }
        }
        if any_failed {
            warn!(worker = %worker_name, ?operation, "sql job: worker batch failed");
            result.workers_failed.push(worker_name.clone());
        } else {
            result.workers_succeeded.push(worker_name.clone());
        }
    }

    job.finish(JobExtendedState::Success);
    Ok(result)
}

fn build_request(
    job_id: uuid::Uuid,
    worker_name: &str,
    operation: SqlOperation,
    payload: serde_json::Value,
    timeout: Duration,
) -> Request {
    Request::new(
        job_id,
        worker_name.to_string(),
        RequestKind::Sql { operation: format!("{operation:?}"), payload },
        timeout,
    )
}

/// Groups hosted chunks per worker, used by ingest endpoints building a
/// `removeTablePartitions`/`createTables` broadcast plan (§4.1/§4.8).
pub fn chunks_per_worker(db_cache: &DbServicesCache, database: &str) -> BTreeMap<String, Vec<i32>> {
    let mut out: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    for replica in db_cache.replicas_for_database(database) {
        out.entry(replica.worker).or_default().push(replica.chunk);
    }
    out
}
