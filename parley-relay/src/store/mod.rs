//! Persistence interface for message records.
//!
//! The delivery engine needs exactly two things from storage: append one
//! message durably, and read back the conversation between two identities
//! in chronological order.
//!
//! ```text
//! ┌───────────────┐  append   ┌──────────────────────────────────────┐
//! │ DeliveryEngine│ ────────► │ MessageStore                         │
//! │               │ ◄──────── │  MemoryStore — Vec, process-local    │
//! └───────────────┘   query   │  RocksStore  — CF "messages" + "meta"│
//!                             └──────────────────────────────────────┘
//! ```
//!
//! No multi-record atomicity is assumed beyond a single append.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use thiserror::Error;

use crate::identity::Identity;
use crate::message::Message;

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend failure (RocksDB, I/O)
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    /// Store cannot currently serve requests
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable message storage.
pub trait MessageStore: Send + Sync {
    /// Persist one message and return the stored record.
    fn append(&self, message: Message) -> Result<Message, StoreError>;

    /// All messages between `a` and `b` in either direction, oldest first.
    /// Messages with the same timestamp keep their append order.
    fn query(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>, StoreError>;

    /// Total number of stored messages.
    fn count(&self) -> Result<usize, StoreError>;
}
