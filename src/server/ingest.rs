// src/server/ingest.rs

//! The Ingest Coordination HTTP surface (C8, §4.8): axum handlers wired
//! directly onto the controller's configuration store and database-services
//! cache. Each handler runs its configuration mutation under the store's
//! own lock (§5); a failure after a partial mutation is reported, not
//! rolled back (§7).

use crate::config::{find_matching_family, ColumnDef, Database, DatabaseFamily, Table};
use crate::core::chunker::{Chunker, DUMMY_CHUNK_ID};
use crate::core::controller::Controller;
use crate::core::db_cache::{ReplicaInfo, ReplicaStatus};
use crate::core::errors::ControlPlaneError;
use crate::core::job::{build_planning_view, least_loaded_destination, physical_table_names, SqlOperation};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/ingest/database", get(list_databases).post(add_database))
        .route("/ingest/database/{name}", put(publish_database).delete(delete_database))
        .route("/ingest/table/{database}", get(list_tables))
        .route("/ingest/table", post(add_table))
        .route("/ingest/table/{database}/{table}", axum::routing::delete(delete_table))
        .route("/ingest/trans", post(begin_transaction))
        .route("/ingest/trans/{id}", put(end_transaction))
        .route("/ingest/chunk", post(add_chunk))
        .route("/ingest/empty-chunks", post(build_empty_chunks_list))
        .with_state(controller)
}

struct ApiError(ControlPlaneError);

impl From<ControlPlaneError> for ApiError {
    fn from(e: ControlPlaneError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // §7/§6: stable `{error, error_code}` JSON schema.
        let status = match &self.0 {
            ControlPlaneError::UnknownWorker(_)
            | ControlPlaneError::UnknownDatabase(_)
            | ControlPlaneError::UnknownFamily(_)
            | ControlPlaneError::UnknownTable(..) => StatusCode::NOT_FOUND,
            ControlPlaneError::AlreadyExists(_)
            | ControlPlaneError::PreconditionFailed(_)
            | ControlPlaneError::InUse(_) => StatusCode::CONFLICT,
            ControlPlaneError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ControlPlaneError::WorkerDisabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControlPlaneError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ControlPlaneError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ControlPlaneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string(), "error_code": self.0.code()}))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// --- /ingest/database ------------------------------------------------------

async fn list_databases(State(controller): State<Arc<Controller>>) -> Json<Value> {
    Json(json!({ "databases": controller.config.all_databases() }))
}

#[derive(Debug, Deserialize)]
struct AddDatabaseRequest {
    database: String,
    num_stripes: u32,
    num_sub_stripes: u32,
    #[serde(default)]
    overlap: f64,
}

async fn add_database(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<AddDatabaseRequest>,
) -> ApiResult {
    let family = match find_matching_family(&controller.config, req.num_stripes, req.num_sub_stripes, req.overlap) {
        Some(f) => f,
        None => {
            let f = DatabaseFamily {
                name: format!("family_{}_{}", req.num_stripes, req.num_sub_stripes),
                min_replication_level: 1,
                num_stripes: req.num_stripes,
                num_sub_stripes: req.num_sub_stripes,
                overlap: req.overlap,
            };
            controller.config.add_database_family(f.clone())?;
            f
        }
    };

    controller.config.add_database(Database {
        name: req.database.clone(),
        family: family.name.clone(),
        is_published: false,
        partitioned_tables: Vec::new(),
        regular_tables: Vec::new(),
    })?;

    let workers = controller.config.workers(true, false);
    controller
        .sql(&workers, SqlOperation::CreateDb, json!({ "database": req.database }))
        .await?;

    Ok(Json(json!({ "database": req.database, "family": family.name })))
}

#[derive(Debug, Deserialize, Default)]
struct PublishDatabaseRequest {
    #[serde(default)]
    consolidate_secondary_index: bool,
    #[serde(default)]
    row_counters_deploy_at_qserv: bool,
}

async fn publish_database(
    State(controller): State<Arc<Controller>>,
    Path(name): Path<String>,
    Json(req): Json<PublishDatabaseRequest>,
) -> ApiResult {
    let db = controller.config.database(&name)?;
    if !controller.db_cache.open_transactions(&name).is_empty() {
        return Err(ControlPlaneError::PreconditionFailed(format!(
            "database '{name}' still has open transactions"
        ))
        .into());
    }
    if controller.db_cache.replicas_for_database(&name).is_empty() {
        return Err(ControlPlaneError::PreconditionFailed(format!(
            "database '{name}' has no chunks registered"
        ))
        .into());
    }

    let workers = controller.config.workers(true, false);
    controller
        .sql(&workers, SqlOperation::GrantAccess, json!({ "database": name }))
        .await?;
    controller
        .sql(&workers, SqlOperation::EnableDb, json!({ "database": name }))
        .await?;

    if req.consolidate_secondary_index {
        for table in controller.config.tables_in_database(&name) {
            if table.is_director {
                controller
                    .sql(&workers, SqlOperation::RemoveTablePartitions, json!({ "table": table.name }))
                    .await?;
            }
        }
    }
    if req.row_counters_deploy_at_qserv {
        controller
            .sql(&workers, SqlOperation::RowStats, json!({ "database": name }))
            .await?;
    }

    controller.config.publish_database(&name)?;
    controller.qserv_sync(&db.family, std::time::Duration::from_secs(300)).await?;

    Ok(Json(json!({ "database": name, "is_published": true })))
}

async fn delete_database(State(controller): State<Arc<Controller>>, Path(name): Path<String>) -> ApiResult {
    let db = controller.config.database(&name)?;
    let workers = controller.config.workers(true, false);
    controller
        .sql(&workers, SqlOperation::DisableDb, json!({ "database": name }))
        .await?;
    controller
        .sql(&workers, SqlOperation::DeleteDb, json!({ "database": name }))
        .await?;
    controller.config.delete_database(&name)?;
    Ok(Json(json!({ "database": name, "family": db.family, "deleted": true })))
}

// --- /ingest/table ----------------------------------------------------------

async fn list_tables(State(controller): State<Arc<Controller>>, Path(database): Path<String>) -> Json<Value> {
    Json(json!({ "tables": controller.config.tables_in_database(&database) }))
}

#[derive(Debug, Deserialize)]
struct AddTableRequest {
    database: String,
    table: String,
    #[serde(default)]
    is_partitioned: bool,
    schema: Vec<ColumnDef>,
    #[serde(default)]
    director_table: bool,
    #[serde(default)]
    director_key: Option<String>,
    #[serde(default)]
    latitude_key: Option<String>,
    #[serde(default)]
    longitude_key: Option<String>,
}

async fn add_table(State(controller): State<Arc<Controller>>, Json(req): Json<AddTableRequest>) -> ApiResult {
    let table = Table {
        name: req.table.clone(),
        database: req.database.clone(),
        is_partitioned: req.is_partitioned,
        is_director: req.director_table,
        director_key: req.director_key,
        latitude_key: req.latitude_key,
        longitude_key: req.longitude_key,
        chunk_id_key: Some("chunkId".to_string()),
        sub_chunk_id_key: Some("subChunkId".to_string()),
        schema: req.schema,
    };
    controller.config.add_table(table.clone())?;

    let workers = controller.config.workers(true, false);
    let physical = if table.is_partitioned {
        physical_table_names(&table.name, &[])
    } else {
        vec![table.name.clone()]
    };
    controller
        .sql(
            &workers,
            SqlOperation::CreateTables,
            json!({ "database": req.database, "tables": physical }),
        )
        .await?;

    Ok(Json(json!({ "database": req.database, "table": req.table })))
}

async fn delete_table(
    State(controller): State<Arc<Controller>>,
    Path((database, table)): Path<(String, String)>,
) -> ApiResult {
    controller.config.table(&database, &table)?;
    let workers = controller.config.workers(true, false);
    controller
        .sql(&workers, SqlOperation::DeleteTable, json!({ "database": database, "table": table }))
        .await?;
    controller.config.delete_table(&database, &table)?;
    Ok(Json(json!({ "database": database, "table": table, "deleted": true })))
}

// --- /ingest/trans -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BeginTransactionRequest {
    database: String,
}

async fn begin_transaction(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<BeginTransactionRequest>,
) -> ApiResult {
    controller.config.database(&req.database)?;
    let id = controller.db_cache.begin_transaction(&req.database);
    Ok(Json(json!({ "database": req.database, "transaction_id": id })))
}

#[derive(Debug, Deserialize, Default)]
struct EndTransactionQuery {
    #[serde(default, rename = "abort")]
    abort: Option<u8>,
    #[serde(default, rename = "build-secondary-index")]
    build_secondary_index: Option<u8>,
}

async fn end_transaction(
    State(controller): State<Arc<Controller>>,
    Path(id): Path<u32>,
    Query(q): Query<EndTransactionQuery>,
) -> ApiResult {
    let abort = q.abort.unwrap_or(0) != 0;
    let transaction = controller
        .db_cache
        .end_transaction(id, abort)
        .ok_or_else(|| ControlPlaneError::InvalidArgument(format!("unknown transaction id {id}")))?;

    if abort {
        let workers = controller.config.workers(true, false);
        controller
            .sql(
                &workers,
                SqlOperation::RemoveTablePartitions,
                json!({ "database": transaction.database, "transaction_id": id }),
            )
            .await?;
    } else if q.build_secondary_index.unwrap_or(0) != 0 {
        let workers = controller.config.workers(true, false);
        controller
            .sql(
                &workers,
                SqlOperation::RowStats,
                json!({ "database": transaction.database, "transaction_id": id }),
            )
            .await?;
    }

    Ok(Json(json!({ "transaction_id": id, "state": format!("{:?}", transaction.state) })))
}

// --- /ingest/chunk -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AddChunkRequest {
    transaction_id: u32,
    chunk: i32,
}

async fn add_chunk(State(controller): State<Arc<Controller>>, Json(req): Json<AddChunkRequest>) -> ApiResult {
    let transaction = controller
        .db_cache
        .transaction(req.transaction_id)
        .ok_or_else(|| ControlPlaneError::InvalidArgument(format!("unknown transaction id {}", req.transaction_id)))?;
    let database = controller.config.database(&transaction.database)?;
    let family = controller.config.family(&database.family)?;
    let chunker = Chunker::new(family.num_stripes, family.num_sub_stripes);
    if !chunker.is_valid(req.chunk) {
        return Err(ControlPlaneError::InvalidArgument(format!(
            "chunk {} is not valid for family '{}'",
            req.chunk, family.name
        ))
        .into());
    }

    let existing = controller.db_cache.replicas_for_chunk(&database.name, req.chunk);
    let worker = match existing.len() {
        0 => {
            // Prefer a worker that already hosts this chunk in another
            // database of the same family, to preserve collocation (§4.8).
            // Only fall back to picking a fresh, least-loaded worker when
            // the chunk has no existing hosts anywhere in the family.
            let view = build_planning_view(&controller.config, &controller.db_cache, &family.name);
            let writable = controller.config.workers(true, false);
            let hosting = view.hosting_workers.get(&req.chunk).cloned().unwrap_or_default();
            hosting
                .into_iter()
                .filter(|w| writable.contains(w))
                .map(|w| (controller.db_cache.occupancy(&w), w))
                .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
                .map(|(_, w)| w)
                .or_else(|| least_loaded_destination(&controller.config, &controller.db_cache, req.chunk, &view))
                .ok_or_else(|| ControlPlaneError::Internal("no writable worker available".to_string()))?
        }
        1 => existing[0].worker.clone(),
        _ => {
            return Err(ControlPlaneError::PreconditionFailed(format!(
                "chunk {} already has {} replicas in database '{}'",
                req.chunk,
                existing.len(),
                database.name
            ))
            .into());
        }
    };

    controller.db_cache.upsert_replica(ReplicaInfo {
        database: database.name.clone(),
        chunk: req.chunk,
        worker: worker.clone(),
        status: ReplicaStatus::Complete,
        verify_time: Utc::now(),
        size_bytes: 0,
    });

    let loader = controller.config.worker(&worker)?;
    Ok(Json(json!({
        "chunk": req.chunk,
        "worker": worker,
        "loader_host": loader.loader_host,
        "loader_port": loader.loader_port,
    })))
}

// --- /ingest/empty-chunks ----------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmptyChunksRequest {
    database: String,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    table_impl: Option<String>,
}

async fn build_empty_chunks_list(
    State(controller): State<Arc<Controller>>,
    Json(req): Json<EmptyChunksRequest>,
) -> ApiResult {
    let database = controller.config.database(&req.database)?;
    let family = controller.config.family(&database.family)?;
    let chunker = Chunker::new(family.num_stripes, family.num_sub_stripes);

    let hosted: std::collections::BTreeSet<i32> = controller
        .db_cache
        .replicas_for_database(&req.database)
        .into_iter()
        .map(|r| r.chunk)
        .filter(|c| *c != DUMMY_CHUNK_ID)
        .collect();
    let empty: Vec<i32> = chunker.all_chunks().filter(|c| !hosted.contains(c)).collect();
    let table_impl = req.table_impl.unwrap_or_else(|| "file".to_string());

    if table_impl == "table" {
        let workers = controller.config.workers(true, false);
        let lines: Vec<String> = empty.iter().map(|c| c.to_string()).collect();
        controller
            .sql(
                &workers,
                SqlOperation::BuildEmptyChunksTable,
                json!({ "database": req.database, "chunks": lines }),
            )
            .await?;
    } else {
        let dir = controller.config.empty_chunks_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ControlPlaneError::Internal(format!("failed to create '{dir}': {e}")))?;
        let path = std::path::Path::new(&dir).join(format!("empty_{}.txt", req.database));
        let mut contents = String::new();
        for chunk in &empty {
            contents.push_str(&chunk.to_string());
            contents.push('\n');
        }
        std::fs::write(&path, contents)
            .map_err(|e| ControlPlaneError::Internal(format!("failed to write '{}': {e}", path.display())))?;
    }

    if req.force || table_impl == "table" {
        warn!(database = %req.database, count = empty.len(), "ingest: computed empty-chunks list");
    }

    Ok(Json(json!({
        "database": req.database,
        "empty_chunks": empty,
        "table_impl": table_impl,
    })))
}

