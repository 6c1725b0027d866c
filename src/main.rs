// src/main.rs

//! The main entry point for the replication control-plane daemon.

use anyhow::Result;
use qserv_replicad::config::{default_config_path, ConfigurationStore};
use qserv_replicad::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("replicad version {VERSION}");
        return Ok(());
    }

    let config_url = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("file:{}", default_config_path().display()));

    let config = match ConfigurationStore::open(&config_url) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_url}\": {e}");
            std::process::exit(1);
        }
    };

    // Setup logging with reloading capabilities so an admin endpoint could
    // later adjust verbosity at runtime without a restart.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();
    let _reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>> = Arc::new(reload_handle);

    if let Err(e) = server::run(config).await {
        error!("control plane runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
