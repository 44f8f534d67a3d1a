//! Layered configuration: defaults < JSON file < environment < flags.
//!
//! Environment variables (`PARLEY_*`, optionally from `.env`) and flags are
//! both read by clap; a flag wins over its variable.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use parley_relay::handler::SenderPolicy;
use parley_relay::server::ServerConfig;
use parley_relay::store::StoreConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("outbound capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local, lost on restart
    Memory,
    /// RocksDB under the data directory
    #[default]
    Rocks,
}

#[derive(Debug, Parser)]
#[command(name = "parley-server", version, about = "Real-time chat relay server")]
pub struct Cli {
    /// Path to JSON config file
    #[arg(long, env = "PARLEY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "PARLEY_BIND", value_name = "ADDR")]
    pub bind: Option<String>,

    #[arg(long, env = "PARLEY_STORAGE", value_enum)]
    pub storage: Option<StorageKind>,

    /// RocksDB directory
    #[arg(long, env = "PARLEY_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Seconds between transport pings
    #[arg(long, env = "PARLEY_HEARTBEAT_SECS")]
    pub heartbeat_secs: Option<u64>,

    /// Frames buffered per connection before drops
    #[arg(long, env = "PARLEY_OUTBOUND_CAPACITY")]
    pub outbound_capacity: Option<usize>,

    /// trust | enforce
    #[arg(long, env = "PARLEY_SENDER_POLICY")]
    pub sender_policy: Option<SenderPolicy>,

    /// fsync every stored message
    #[arg(long, env = "PARLEY_SYNC_WRITES")]
    pub sync_writes: Option<bool>,
}

/// Values accepted in the JSON config file. All optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub storage: Option<StorageKind>,
    pub data_dir: Option<PathBuf>,
    pub heartbeat_secs: Option<u64>,
    pub outbound_capacity: Option<usize>,
    pub sender_policy: Option<SenderPolicy>,
    pub sync_writes: Option<bool>,
}

pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub storage: StorageKind,
    pub store: StoreConfig,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let mut server = ServerConfig::default();
        let mut store = StoreConfig::default();

        if let Some(bind) = cli.bind.clone().or(file.bind) {
            server.bind_addr = bind;
        }
        if let Some(secs) = cli.heartbeat_secs.or(file.heartbeat_secs) {
            server.heartbeat_interval_secs = secs;
        }
        if let Some(capacity) = cli.outbound_capacity.or(file.outbound_capacity) {
            if capacity == 0 {
                return Err(ConfigError::ZeroCapacity);
            }
            server.outbound_capacity = capacity;
        }
        if let Some(policy) = cli.sender_policy.or(file.sender_policy) {
            server.sender_policy = policy;
        }
        if let Some(dir) = cli.data_dir.clone().or(file.data_dir) {
            store.path = dir;
        }
        if let Some(sync) = cli.sync_writes.or(file.sync_writes) {
            store.sync_writes = sync;
        }

        Ok(Self {
            server,
            storage: cli.storage.or(file.storage).unwrap_or_default(),
            store,
        })
    }
}
