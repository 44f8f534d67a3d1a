//! Parley relay server binary.

mod config;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use parley_relay::server::RelayServer;
use parley_relay::store::{MemoryStore, MessageStore, RocksStore};
use tokio::signal;

use config::{Cli, Settings, StorageKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;

    log::info!("parley-server v{} starting", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn MessageStore> = match settings.storage {
        StorageKind::Memory => {
            log::warn!("Using in-memory storage; history is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageKind::Rocks => Arc::new(RocksStore::open(settings.store.clone())?),
    };

    log::info!(
        "Sender policy: {}, heartbeat every {}s",
        settings.server.sender_policy,
        settings.server.heartbeat_interval_secs
    );

    let server = RelayServer::new(settings.server, store);

    tokio::select! {
        result = server.run() => {
            if let Err(err) = result {
                log::error!("Relay server error: {err}");
                return Err(err);
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping relay server...");
        }
    }

    let stats = server.stats().await;
    log::info!(
        "Final statistics: {} connections served, {} frames delivered, {} dropped",
        stats.total_connections,
        stats.frames_delivered,
        stats.frames_dropped
    );

    Ok(())
}
