//! Room registry: identity → live connections.
//!
//! Each identity owns a room holding every connection currently joined
//! under it (one per device). Delivery looks the receiver's room up and
//! pushes a pre-encoded frame into each connection's outbound queue.
//!
//! All mutations and lookups go through one `RwLock`, so register,
//! unregister and lookup are serialized with respect to each other.
//! Emitting never holds the lock and never waits on a receiver: queues are
//! bounded and a full or closed queue drops the frame for that connection
//! only.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::identity::{ConnectionId, Identity};

/// One pre-encoded outbound frame, shared across every fan-out target.
pub type Frame = Arc<str>;

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Create a handle with a bounded outbound queue of `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Frame) -> Result<(), mpsc::error::TrySendError<Frame>> {
        self.tx.try_send(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub rooms: usize,
    pub connections: usize,
}

#[derive(Default)]
struct Rooms {
    by_identity: HashMap<Identity, HashMap<ConnectionId, ConnectionHandle>>,
    by_connection: HashMap<ConnectionId, HashSet<Identity>>,
}

/// Live identity → connection mapping. Process-local; rebuilt as clients
/// re-join after a restart.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<Rooms>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to the room of `identity`, creating the room if needed.
    ///
    /// Returns `false` if the connection was already a member.
    pub async fn register(&self, identity: Identity, handle: ConnectionHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        let conn_id = handle.id();
        let added = rooms
            .by_identity
            .entry(identity.clone())
            .or_default()
            .insert(conn_id, handle)
            .is_none();
        rooms.by_connection.entry(conn_id).or_default().insert(identity);
        added
    }

    /// Remove `conn_id` from the room of `identity` only.
    ///
    /// Returns `false` if it was not a member.
    pub async fn leave(&self, identity: &Identity, conn_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let removed = match rooms.by_identity.get_mut(identity) {
            Some(room) => {
                let removed = room.remove(&conn_id).is_some();
                if room.is_empty() {
                    rooms.by_identity.remove(identity);
                }
                removed
            }
            None => false,
        };
        if let Some(identities) = rooms.by_connection.get_mut(&conn_id) {
            identities.remove(identity);
            if identities.is_empty() {
                rooms.by_connection.remove(&conn_id);
            }
        }
        removed
    }

    /// Remove `conn_id` from every room it belongs to.
    ///
    /// Returns the identities it was registered under (empty if none).
    pub async fn unregister(&self, conn_id: ConnectionId) -> Vec<Identity> {
        let mut rooms = self.rooms.write().await;
        let identities = rooms.by_connection.remove(&conn_id).unwrap_or_default();
        for identity in &identities {
            if let Some(room) = rooms.by_identity.get_mut(identity) {
                room.remove(&conn_id);
                if room.is_empty() {
                    rooms.by_identity.remove(identity);
                }
            }
        }
        identities.into_iter().collect()
    }

    /// Connections currently joined under `identity`. Empty when offline.
    pub async fn lookup(&self, identity: &Identity) -> Vec<ConnectionHandle> {
        self.rooms
            .read()
            .await
            .by_identity
            .get(identity)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Identities `conn_id` is joined under.
    pub async fn identities_of(&self, conn_id: ConnectionId) -> Vec<Identity> {
        self.rooms
            .read()
            .await
            .by_connection
            .get(&conn_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Push `frame` to every connection in the room of `identity`.
    ///
    /// Returns how many connections accepted the frame.
    pub async fn emit(&self, identity: &Identity, frame: Frame) -> usize {
        let targets = self.lookup(identity).await;
        self.emit_to(&targets, frame)
    }

    /// Push `frame` to each handle without blocking.
    pub fn emit_to(&self, targets: &[ConnectionHandle], frame: Frame) -> usize {
        let mut delivered = 0;
        for handle in targets {
            match handle.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Outbound queue full for connection {}, frame dropped", handle.id());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Connection {} closed before delivery", handle.id());
                }
            }
        }
        self.frames_sent.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.by_identity.len()
    }

    /// Number of connections joined under at least one identity.
    pub async fn connection_count(&self) -> usize {
        self.rooms.read().await.by_connection.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let rooms = self.rooms.read().await;
        RegistryStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            rooms: rooms.by_identity.len(),
            connections: rooms.by_connection.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(8);

        assert!(registry.register(id("alice"), conn.clone()).await);
        assert!(!registry.register(id("alice"), conn.clone()).await);

        assert_eq!(registry.lookup(&id("alice")).await.len(), 1);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_offline_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.lookup(&id("nobody")).await.is_empty());
    }

    #[tokio::test]
    async fn test_register_then_unregister() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(8);
        let (other, _rx2) = ConnectionHandle::channel(8);

        registry.register(id("alice"), conn.clone()).await;
        registry.register(id("alice"), other.clone()).await;

        let left = registry.unregister(conn.id()).await;
        assert_eq!(left, vec![id("alice")]);

        let remaining: Vec<ConnectionId> = registry
            .lookup(&id("alice"))
            .await
            .iter()
            .map(|h| h.id())
            .collect();
        assert_eq!(remaining, vec![other.id()]);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let registry = RoomRegistry::new();
        assert!(registry.unregister(ConnectionId::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_removes_all_memberships() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(8);

        registry.register(id("alice"), conn.clone()).await;
        registry.register(id("work-alice"), conn.clone()).await;
        assert_eq!(registry.identities_of(conn.id()).await.len(), 2);

        let mut left = registry.unregister(conn.id()).await;
        left.sort();
        assert_eq!(left, vec![id("alice"), id("work-alice")]);
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_single_room() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(8);

        registry.register(id("alice"), conn.clone()).await;
        registry.register(id("bob"), conn.clone()).await;

        assert!(registry.leave(&id("alice"), conn.id()).await);
        assert!(!registry.leave(&id("alice"), conn.id()).await);

        assert!(registry.lookup(&id("alice")).await.is_empty());
        assert_eq!(registry.lookup(&id("bob")).await.len(), 1);
        assert_eq!(registry.identities_of(conn.id()).await, vec![id("bob")]);
    }

    #[tokio::test]
    async fn test_emit_fans_out_to_every_connection() {
        let registry = RoomRegistry::new();
        let (phone, mut phone_rx) = ConnectionHandle::channel(8);
        let (laptop, mut laptop_rx) = ConnectionHandle::channel(8);

        registry.register(id("alice"), phone).await;
        registry.register(id("alice"), laptop).await;

        let frame: Frame = Arc::from("payload");
        assert_eq!(registry.emit(&id("alice"), frame).await, 2);

        assert_eq!(&*phone_rx.recv().await.unwrap(), "payload");
        assert_eq!(&*laptop_rx.recv().await.unwrap(), "payload");
        assert!(phone_rx.try_recv().is_err());
        assert!(laptop_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_connection_does_not_block_others() {
        let registry = RoomRegistry::new();
        let (slow, _slow_rx) = ConnectionHandle::channel(1);
        let (fast, mut fast_rx) = ConnectionHandle::channel(8);

        registry.register(id("alice"), slow).await;
        registry.register(id("alice"), fast).await;

        registry.emit(&id("alice"), Arc::from("one")).await;
        // slow queue is now full; second emit drops for it only
        let delivered = registry.emit(&id("alice"), Arc::from("two")).await;
        assert_eq!(delivered, 1);

        assert_eq!(&*fast_rx.recv().await.unwrap(), "one");
        assert_eq!(&*fast_rx.recv().await.unwrap(), "two");

        let stats = registry.stats().await;
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[tokio::test]
    async fn test_emit_to_closed_connection_counts_drop() {
        let registry = RoomRegistry::new();
        let (conn, rx) = ConnectionHandle::channel(4);
        registry.register(id("bob"), conn).await;
        drop(rx);

        assert_eq!(registry.emit(&id("bob"), Arc::from("lost")).await, 0);
        assert_eq!(registry.stats().await.frames_dropped, 1);
    }
}
