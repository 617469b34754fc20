//! Home Assistant Rust Server
//!
//! Loads config entries from the config directory, sets them up, and unloads
//! them again on Ctrl-C.
//!
//! Usage: `homeassistant [CONFIG_DIR]` (defaults to the current directory)

mod demo;

use anyhow::{Context, Result};
use ha_config_entries::{
    ConfigEntries, ConfigEntriesConfig, ConfigEntry, ConfigEntryChange, ConfigEntrySource,
    Integrations, Storage,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Build the config entries manager for a config directory.
///
/// Seeds a demo entry when the directory has none yet.
async fn bootstrap(config_dir: &Path) -> Result<ConfigEntries> {
    let config = ConfigEntriesConfig::load(config_dir)
        .with_context(|| format!("loading configuration from {:?}", config_dir))?;

    let integrations = Arc::new(Integrations::new());
    demo::register(&integrations);

    let storage = Arc::new(Storage::new(config_dir));
    let config_entries = ConfigEntries::new(storage, integrations, config);
    let loaded = config_entries
        .load()
        .await
        .context("loading config entries")?;
    info!("Loaded {} config entries", loaded);

    if config_entries.is_empty() {
        let entry = ConfigEntry::new(demo::DOMAIN, "Demo Hub")
            .with_unique_id("demo-hub")
            .with_data_value("host", json!("127.0.0.1"))
            .with_source(ConfigEntrySource::Import);
        config_entries.add(entry).await?;
        info!("Created demo config entry");
    }

    Ok(config_entries)
}

/// Log entry changes until the manager goes away
fn spawn_change_logger(config_entries: &ConfigEntries) {
    let mut changes = config_entries.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(ConfigEntryChange::StateChanged {
                    entry_id,
                    domain,
                    from,
                    to,
                    reason,
                }) => info!(
                    entry_id = %entry_id,
                    domain = %domain,
                    "Config entry {} -> {}{}",
                    from,
                    to,
                    reason.map(|r| format!(" ({})", r)).unwrap_or_default()
                ),
                Ok(change) => debug!(entry_id = %change.entry_id(), "Config entry change: {:?}", change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Change logger lagged, skipped {} changes", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    info!("Starting Home Assistant (Rust) in {:?}", config_dir);

    let config_entries = bootstrap(&config_dir).await?;
    spawn_change_logger(&config_entries);

    for result in config_entries.async_setup_all().await {
        if let Err(err) = result {
            error!("Error setting up config entry: {}", err);
        }
    }

    info!("Home Assistant is running");

    // Keep the server running
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    config_entries.async_shutdown().await;

    Ok(())
}
