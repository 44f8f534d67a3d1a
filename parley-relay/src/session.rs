//! Connection lifecycle.
//!
//! ```text
//!              join                    close
//!  Unjoined ───────────► Joined ─────────────────► Closed
//!     ▲   │                 │ ▲  join (adds identity)
//!     │   │ close           └─┘
//!     │   └──────────────────────────────────────► Closed
//!     └──── leave (last identity) ── Joined
//! ```
//!
//! A connection may be joined under several identities at once: a second
//! `join` adds a membership and keeps the earlier ones. `leave` drops one
//! membership; `close` drops all of them and is terminal.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::identity::{ConnectionId, Identity};
use crate::registry::{ConnectionHandle, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unjoined,
    Joined,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Lifecycle of one live connection.
pub struct Session {
    handle: ConnectionHandle,
    registry: Arc<RoomRegistry>,
    identities: BTreeSet<Identity>,
    state: ConnectionState,
}

impl Session {
    pub fn new(handle: ConnectionHandle, registry: Arc<RoomRegistry>) -> Self {
        Self {
            handle,
            registry,
            identities: BTreeSet::new(),
            state: ConnectionState::Unjoined,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identities this connection is joined under, sorted.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    pub fn is_joined_as(&self, identity: &Identity) -> bool {
        self.identities.contains(identity)
    }

    /// Join the room of `identity`. Earlier memberships are kept.
    pub async fn join(&mut self, identity: Identity) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.registry
            .register(identity.clone(), self.handle.clone())
            .await;
        log::info!("Connection {} joined as {identity}", self.id());
        self.identities.insert(identity);
        self.state = ConnectionState::Joined;
        Ok(())
    }

    /// Leave the room of `identity`. Returns `false` if not a member.
    pub async fn leave(&mut self, identity: &Identity) -> Result<bool, SessionError> {
        self.ensure_open()?;
        if !self.identities.remove(identity) {
            return Ok(false);
        }
        self.registry.leave(identity, self.id()).await;
        log::info!("Connection {} left {identity}", self.id());
        if self.identities.is_empty() {
            self.state = ConnectionState::Unjoined;
        }
        Ok(true)
    }

    /// Tear down every membership. Idempotent.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let left = self.registry.unregister(self.id()).await;
        log::debug!("Connection {} closed, left {} room(s)", self.id(), left.len());
        self.identities.clear();
        self.state = ConnectionState::Closed;
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state == ConnectionState::Closed {
            return Err(SessionError::Closed(self.id()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn session(registry: &Arc<RoomRegistry>) -> Session {
        let (handle, _rx) = ConnectionHandle::channel(8);
        Session::new(handle, registry.clone())
    }

    #[tokio::test]
    async fn test_starts_unjoined() {
        let registry = Arc::new(RoomRegistry::new());
        let s = session(&registry);
        assert_eq!(s.state(), ConnectionState::Unjoined);
        assert_eq!(s.identities().count(), 0);
    }

    #[tokio::test]
    async fn test_join_registers() {
        let registry = Arc::new(RoomRegistry::new());
        let mut s = session(&registry);

        s.join(id("alice")).await.unwrap();
        assert_eq!(s.state(), ConnectionState::Joined);
        assert!(s.is_joined_as(&id("alice")));

        let room = registry.lookup(&id("alice")).await;
        assert_eq!(room.len(), 1);
        assert_eq!(room[0].id(), s.id());
    }

    #[tokio::test]
    async fn test_second_join_keeps_first_membership() {
        let registry = Arc::new(RoomRegistry::new());
        let mut s = session(&registry);

        s.join(id("alice")).await.unwrap();
        s.join(id("bob")).await.unwrap();

        assert_eq!(registry.lookup(&id("alice")).await.len(), 1);
        assert_eq!(registry.lookup(&id("bob")).await.len(), 1);
        let ids: Vec<&Identity> = s.identities().collect();
        assert_eq!(ids, vec![&id("alice"), &id("bob")]);
    }

    #[tokio::test]
    async fn test_leave_last_identity_returns_to_unjoined() {
        let registry = Arc::new(RoomRegistry::new());
        let mut s = session(&registry);

        s.join(id("alice")).await.unwrap();
        s.join(id("bob")).await.unwrap();

        assert!(s.leave(&id("alice")).await.unwrap());
        assert_eq!(s.state(), ConnectionState::Joined);
        assert!(!s.leave(&id("alice")).await.unwrap());

        assert!(s.leave(&id("bob")).await.unwrap());
        assert_eq!(s.state(), ConnectionState::Unjoined);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_unregisters_everywhere() {
        let registry = Arc::new(RoomRegistry::new());
        let mut s = session(&registry);

        s.join(id("alice")).await.unwrap();
        s.join(id("bob")).await.unwrap();
        s.close().await;

        assert_eq!(s.state(), ConnectionState::Closed);
        assert!(registry.lookup(&id("alice")).await.is_empty());
        assert!(registry.lookup(&id("bob")).await.is_empty());
    }

    #[tokio::test]
    async fn test_close_from_unjoined() {
        let registry = Arc::new(RoomRegistry::new());
        let mut s = session(&registry);
        s.close().await;
        s.close().await;
        assert_eq!(s.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_events() {
        let registry = Arc::new(RoomRegistry::new());
        let mut s = session(&registry);
        s.close().await;

        let err = s.join(id("alice")).await.unwrap_err();
        assert_eq!(err, SessionError::Closed(s.id()));
        assert!(s.leave(&id("alice")).await.is_err());
        assert!(registry.lookup(&id("alice")).await.is_empty());
    }
}
