//! Delivery engine: persist, then fan out.
//!
//! ```text
//! send(sender, receiver, content)
//!   │
//!   ├─ 1. Message::new (stamped now)
//!   ├─ 2. store.append ──── Err ──► DeliveryError::Persistence (no emit)
//!   ├─ 3. registry.lookup(receiver)
//!   └─ 4. emit receive-message to each connection (empty room is fine)
//! ```
//!
//! The append completes before any receiver can observe the message.
//! Store calls run on the blocking pool so a slow disk never stalls the
//! connection tasks sharing the runtime.

use std::sync::Arc;

use thiserror::Error;

use crate::identity::Identity;
use crate::message::Message;
use crate::protocol::{ProtocolError, ServerEvent};
use crate::registry::RoomRegistry;
use crate::store::{MessageStore, StoreError};

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Single entry point for message transmission and history.
#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<dyn MessageStore>,
    registry: Arc<RoomRegistry>,
}

impl DeliveryEngine {
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<RoomRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Persist a message and push it to every connection of `receiver`.
    pub async fn send(
        &self,
        sender: Identity,
        receiver: Identity,
        content: String,
    ) -> Result<Message, DeliveryError> {
        let message = self.post(sender, receiver, content).await?;

        let frame = ServerEvent::receive(&message).frame()?;
        let delivered = self.registry.emit(&message.receiver, frame).await;
        log::debug!(
            "Message {} {} → {} delivered to {delivered} connection(s)",
            message.id,
            message.sender,
            message.receiver
        );

        Ok(message)
    }

    /// Persist a message without live delivery.
    pub async fn post(
        &self,
        sender: Identity,
        receiver: Identity,
        content: String,
    ) -> Result<Message, DeliveryError> {
        let message = Message::new(sender, receiver, content);
        let store = self.store.clone();

        let stored = tokio::task::spawn_blocking(move || store.append(message))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
            .and_then(|r| r);

        stored.map_err(|e| {
            log::error!("Failed to persist message: {e}");
            DeliveryError::Persistence(e)
        })
    }

    /// Conversation between `a` and `b` in either direction, oldest first.
    pub async fn history(&self, a: Identity, b: Identity) -> Result<Vec<Message>, DeliveryError> {
        let store = self.store.clone();
        let messages = tokio::task::spawn_blocking(move || store.query(&a, &b))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))??;
        Ok(messages)
    }
}
