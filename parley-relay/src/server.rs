//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client X (alice) ──┐                       ┌── RoomRegistry
//!                    ├── task per connection ┤      alice → {X, X'}
//! Client X'(alice) ──┤   EventHandler        │      bob   → {Y}
//!                    │     └ Session         └── DeliveryEngine
//! Client Y (bob)   ──┘                              └ MessageStore
//! ```
//!
//! Each connection task multiplexes three sources with `select!`:
//! inbound WebSocket frames, its own outbound queue (fan-out from other
//! connections), and a heartbeat ticker. Liveness is left to the
//! transport: a close frame, EOF or a failed write ends the task, and the
//! session is torn down on every exit path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::delivery::DeliveryEngine;
use crate::handler::{EventHandler, SenderPolicy};
use crate::protocol::{ErrorCode, ServerEvent};
use crate::registry::{ConnectionHandle, Frame, RoomRegistry};
use crate::session::Session;
use crate::store::{MemoryStore, MessageStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound frames buffered per connection before drops
    pub outbound_capacity: usize,
    /// Transport ping interval in seconds
    pub heartbeat_interval_secs: u64,
    pub sender_policy: SenderPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            outbound_capacity: 256,
            heartbeat_interval_secs: 30,
            sender_policy: SenderPolicy::Enforce,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub malformed_frames: u64,
    pub active_rooms: usize,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
}

/// The relay server.
#[derive(Clone)]
pub struct RelayServer {
    config: ServerConfig,
    engine: DeliveryEngine,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, store: Arc<dyn MessageStore>) -> Self {
        let engine = DeliveryEngine::new(store, Arc::new(RoomRegistry::new()));
        Self {
            config,
            engine,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Default configuration with an in-memory store.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default(), Arc::new(MemoryStore::new()))
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Relay server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let engine = self.engine.clone();
            let config = self.config.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, config, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: DeliveryEngine,
        config: ServerConfig,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;

        let (handle, outbound_rx) = ConnectionHandle::channel(config.outbound_capacity);
        let session = Session::new(handle, engine.registry().clone());
        let mut handler = EventHandler::new(session, engine, config.sender_policy);

        log::info!(
            "WebSocket connection {} established from {addr}",
            handler.session().id()
        );
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::pump(ws_stream, &mut handler, outbound_rx, &config, &stats).await;

        handler.close().await;
        stats.write().await.active_connections -= 1;
        log::info!("Connection {} from {addr} closed", handler.session().id());

        result
    }

    /// Drive one connection until the client goes away.
    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        handler: &mut EventHandler,
        mut outbound_rx: mpsc::Receiver<Frame>,
        config: &ServerConfig,
        stats: &Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let period = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let reply = handler.handle_text(text.as_str()).await;
                            let malformed = matches!(
                                reply,
                                Some(ServerEvent::Error { code: ErrorCode::MalformedEvent, .. })
                            );
                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                                if malformed {
                                    s.malformed_frames += 1;
                                }
                            }
                            if let Some(reply) = reply {
                                ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            stats.write().await.malformed_frames += 1;
                            let reply = ServerEvent::error(
                                ErrorCode::MalformedEvent,
                                "binary frames are not supported",
                            );
                            ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => return Ok(()),

                        Some(Err(e)) => {
                            log::warn!("WebSocket error on connection {}: {e}", handler.session().id());
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            ws_sender.send(Message::Text(frame.to_string().into())).await?;
                        }
                        None => return Ok(()),
                    }
                }

                _ = heartbeat.tick() => {
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }

    /// Snapshot of server statistics.
    pub async fn stats(&self) -> ServerStats {
        let registry = self.engine.registry().stats().await;
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = registry.rooms;
        stats.frames_delivered = registry.frames_sent;
        stats.frames_dropped = registry.frames_dropped;
        stats
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn engine(&self) -> &DeliveryEngine {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.engine.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.sender_policy, SenderPolicy::Enforce);
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            outbound_capacity: 16,
            heartbeat_interval_secs: 5,
            sender_policy: SenderPolicy::Trust,
        };
        let server = RelayServer::new(config, Arc::new(MemoryStore::new()));
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(server.config().sender_policy, SenderPolicy::Trust);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.malformed_frames, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.frames_delivered, 0);
    }

    #[tokio::test]
    async fn test_clones_share_registry() {
        let server = RelayServer::with_defaults();
        let clone = server.clone();
        assert!(Arc::ptr_eq(server.registry(), clone.registry()));
    }
}
