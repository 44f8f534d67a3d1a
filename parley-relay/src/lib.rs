//! # parley-relay — Real-time chat relay
//!
//! Persists direct messages between identities and pushes them live to
//! every connection joined under the recipient identity.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer  │
//! │ (per device)│     JSON events     │ (central)    │
//! └─────────────┘                     └──────┬───────┘
//!                                            │ one Session per connection
//!                                            ▼
//!                                    ┌───────────────┐
//!                                    │ DeliveryEngine│
//!                                    └───┬───────┬───┘
//!                          1. append     │       │  2. fan-out
//!                                        ▼       ▼
//!                              ┌────────────┐ ┌──────────────┐
//!                              │MessageStore│ │ RoomRegistry │
//!                              │ (RocksDB)  │ │ identity→conn│
//!                              └────────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`identity`] — Validated identity and connection id types
//! - [`message`] — Persisted message record
//! - [`store`] — Persistence interface (memory + RocksDB)
//! - [`registry`] — Identity → connection rooms with non-blocking emit
//! - [`session`] — Per-connection join/leave/close state machine
//! - [`delivery`] — Persist-then-broadcast engine and history queries
//! - [`protocol`] — JSON wire events
//! - [`handler`] — Typed dispatch of inbound events for one connection
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket relay client

pub mod identity;
pub mod message;
pub mod store;
pub mod registry;
pub mod session;
pub mod delivery;
pub mod protocol;
pub mod handler;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use identity::{ConnectionId, Identity, IdentityError};
pub use message::Message;
pub use store::{MemoryStore, MessageStore, RocksStore, StoreConfig, StoreError};
pub use registry::{ConnectionHandle, Frame, RegistryStats, RoomRegistry};
pub use session::{ConnectionState, Session, SessionError};
pub use delivery::{DeliveryEngine, DeliveryError};
pub use protocol::{ClientEvent, ErrorCode, ProtocolError, ServerEvent};
pub use handler::{EventHandler, SenderPolicy};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use client::{ClientError, RelayClient};
