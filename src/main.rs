// SPDX-License-Identifier: GPL-3.0-only
mod api;
mod catalog;
mod config;
mod logging;
mod store;
mod sync;
mod utils;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use api::{ApiHandlers, HttpServer};
use catalog::{Catalog, ImageResolver, LanguageSelection};
use config::Config;
use logging::setup_logging;
use store::{KeyValueStore, Preferences, SqliteKeyValueStore};
use sync::{HttpRemoteStateClient, RemoteStateClient, SyncOrchestrator, SyncSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    setup_logging(&config.log_level, &config.log_format)?;

    info!("Starting anime-va-sync v{}", env!("CARGO_PKG_VERSION"));

    let default_language: LanguageSelection = config.default_language.parse()?;

    // Local persistence
    if let Some(parent) = config.state_db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::new(&config.state_db_path).await?);

    let device_id = match config.device_id.clone() {
        Some(id) => id,
        None => Preferences::new(Arc::clone(&kv)).device_id().await,
    };
    info!(device_id = %device_id, "Device identity ready");

    // Remote state service
    let remote: Arc<dyn RemoteStateClient> = Arc::new(HttpRemoteStateClient::new(
        &config.sync_api_url,
        config.sync_api_key.clone(),
        device_id.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )?);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::clone(&kv),
        remote,
        SyncSettings {
            device_id,
            batch_size: config.flush_batch_size,
            default_language,
        },
    ));

    // Reopen the last profile; its fetch and flush run in the background
    if orchestrator.restore().await.is_none() {
        info!("No active profile, waiting for selection");
    }

    let catalog = Catalog::load(&config.catalog_dir, orchestrator.language().await).await;
    if catalog.is_empty() {
        error!(dir = %config.catalog_dir.display(), "Catalog is empty, check catalog_dir");
    } else {
        info!(count = catalog.len(), language = %catalog.selection, "Catalog loaded");
    }

    // Periodic fetch + flush for the active profile
    let orchestrator_sync = Arc::clone(&orchestrator);
    let sync_interval = config.sync_interval_secs;
    let sync_task = tokio::spawn(async move {
        if sync_interval == 0 {
            info!("Periodic sync disabled");
            return;
        }
        info!(interval_secs = sync_interval, "Sync task started");
        let mut interval = tokio::time::interval(Duration::from_secs(sync_interval));
        // The first tick fires immediately and the profile load already synced
        interval.tick().await;
        loop {
            interval.tick().await;

            match orchestrator_sync.sync_now().await {
                Ok(report) => {
                    info!(profile = %report.profile_id, merge = ?report.merge, flush = ?report.flush, "Periodic sync finished");
                }
                Err(sync::SyncError::NoActiveProfile) => {}
                Err(e) => {
                    error!(error = %e, "Periodic sync failed");
                }
            }
        }
    });

    // Start HTTP server
    let handlers = Arc::new(ApiHandlers::new(
        Arc::clone(&orchestrator),
        catalog,
        config.catalog_dir.clone(),
        ImageResolver::new(config.image_base_url.clone(), config.image_version.clone()),
    ));
    let http_server = HttpServer::new(handlers, config.local_api_bind);
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve().await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    info!("Initiating graceful shutdown...");

    sync_task.abort();
    http_task.abort();

    // Last chance to deliver queued updates; they stay queued if this fails
    if let Some(profile_id) = orchestrator.active_profile().await {
        let outcome = orchestrator.flush(&profile_id).await;
        info!(profile = %profile_id, outcome = ?outcome, "Final flush");
    }

    info!("Shutdown complete");
    Ok(())
}
