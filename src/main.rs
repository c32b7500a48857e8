//! campus-status - University service status monitor
//!
//! Probes the university's public services on a fixed period, tracks
//! incidents, alerts over Telegram and Web Push, and serves the current
//! status over a small JSON API.

mod config;
mod db;
mod monitor;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::{ServerConfig, StoreBackend};
use db::{MemoryStore, SqliteStore, StatusStore};
use notify::Notifier;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("campus_status=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load()?;
    tracing::info!("Starting campus-status on port {}...", cfg.http_port);
    tracing::info!(
        "Monitoring {} targets: {}",
        cfg.targets.len(),
        cfg.targets.iter().map(|t| t.id.as_str()).collect::<Vec<_>>().join(", ")
    );

    // Initialize storage
    let store: Arc<dyn StatusStore> = match cfg.store {
        StoreBackend::Sqlite => {
            tracing::info!("Using database at {}", cfg.db_path);
            Arc::new(SqliteStore::new(&cfg.db_path)?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier = Arc::new(Notifier::new(&cfg, store.clone())?);
    if !notifier.chat_enabled() {
        tracing::info!("Telegram not configured, chat alerts disabled");
    }
    if notifier.vapid_public_key().is_none() {
        tracing::info!("VAPID keys not configured, web push disabled");
    }

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(&cfg, store.clone(), notifier.clone())?);
    let _ticker = scheduler.start();

    // Start web server
    let server = Server::new(cfg.http_port, store, notifier);
    server.start().await?;

    Ok(())
}
