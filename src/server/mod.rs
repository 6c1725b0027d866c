// src/server/mod.rs

//! Orchestrates the three long-running parts of the control plane: the
//! replication loop (C6), the health monitor (C7), and the HTTP surface
//! (ingest coordination, C8, plus `/metrics`). All three share one
//! [`Controller`].

pub mod ingest;

use crate::config::ConfigurationStore;
use crate::core::controller::Controller;
use crate::core::health_monitor::{run_health_monitor, HealthMonitorConfig};
use crate::core::metrics::gather_metrics;
use crate::core::protocol::TcpWorkerTransport;
use crate::core::replication_loop::{run_replication_loop, FailedFlag, ReplicationLoopConfig, StopReplicationFlag};
use anyhow::Result;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], gather_metrics())
}

/// Builds the HTTP surface: ingest coordination endpoints plus `/metrics`.
pub fn http_router(controller: Arc<Controller>) -> Router {
    ingest::router(controller).route("/metrics", get(metrics_handler))
}

/// Runs the control plane until the HTTP server exits (normally only on a
/// bind failure or signal): spawns the replication loop, the health
/// monitor, and the HTTP server, all sharing one [`Controller`].
pub async fn run(config: ConfigurationStore) -> Result<()> {
    let config = Arc::new(config);
    let http_port = config.controller_http_server_port();
    let transport = Arc::new(TcpWorkerTransport);
    let controller = Arc::new(Controller::new(Arc::clone(&config), transport));

    let stop_replication = Arc::new(StopReplicationFlag::default());
    let stop_requested = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(FailedFlag::default());

    let loop_handle = tokio::spawn(run_replication_loop(
        Arc::clone(&controller),
        Arc::clone(&stop_replication),
        Arc::clone(&stop_requested),
        Arc::clone(&failed),
        ReplicationLoopConfig::default(),
    ));
    let monitor_handle = tokio::spawn(run_health_monitor(
        Arc::clone(&controller),
        Arc::clone(&stop_replication),
        Arc::clone(&stop_requested),
        Arc::clone(&failed),
        HealthMonitorConfig::default(),
    ));

    let app = http_router(Arc::clone(&controller));
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    info!("control plane HTTP surface listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    stop_requested.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = loop_handle.await;
    monitor_handle.abort();

    Ok(())
}
