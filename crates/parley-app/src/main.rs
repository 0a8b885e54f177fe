//! Parley binary - composition root.
//!
//! 1. Load configuration from TOML, applying CLI and env overrides
//! 2. Open the SQLite session store
//! 3. Build the pipeline with the demo skills and keyword extractor
//! 4. Either serve the webhook or replay a JSON-lines file as one batch

mod cli;
mod skills;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;

use parley_api::state::AppState;
use parley_core::config::ParleyConfig;
use parley_engine::{Dispatcher, Pipeline};
use parley_storage::SqliteStore;

use crate::cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Parse a JSON-lines file into raw events. Blank lines are skipped; a line
/// that is not JSON is kept as a string so the pipeline reports it malformed.
fn read_events(path: &Path) -> std::io::Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Unparseable replay line");
                Value::String(line.to_string())
            })
        })
        .collect())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.server.port = args.resolve_port(config.server.port);

    // Tracing. RUST_LOG wins over the configured level.
    let default_level = config.general.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db_path = data_dir.join("parley.db");
    let store = SqliteStore::open(&db_path)?;
    let database = store.database();
    tracing::info!(path = %db_path.display(), "Session store opened");

    // Pipeline.
    let pipeline = Pipeline::builder(Arc::new(store))
        .config(&config.engine)
        .skills(skills::demo_skills())
        .intent_extractor(Arc::new(skills::demo_extractor()?))
        .build()?;
    let dispatcher = Dispatcher::new(Arc::new(pipeline), config.engine.max_workers);

    match args.command() {
        Command::Replay { file } => {
            let events = read_events(&file)?;
            tracing::info!(path = %file.display(), events = events.len(), "Replaying events");
            let report = dispatcher.process(events).await?;
            println!(
                "processed={} failed={} malformed={} unpersisted={}",
                report.processed, report.failed, report.malformed, report.unpersisted
            );
        }
        Command::Serve => {
            let state = AppState::new(config.server.clone(), dispatcher.clone(), database);
            let served = parley_api::start_server(&config.server, state, shutdown_signal()).await;
            // Submitted batches are never cancelled; drain before exiting.
            dispatcher.shutdown().await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Webhook server failed");
                tracing::error!(
                    "Try: PARLEY_PORT={} parley serve",
                    config.server.port.saturating_add(1)
                );
                return Err(e.into());
            }
        }
    }

    Ok(())
}
