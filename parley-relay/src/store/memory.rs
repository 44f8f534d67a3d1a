//! In-memory message store.

use std::sync::Mutex;

use super::{MessageStore, StoreError};
use crate::identity::Identity;
use crate::message::Message;

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStore {
    fn append(&self, message: Message) -> Result<Message, StoreError> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        messages.push(message.clone());
        Ok(message)
    }

    fn query(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>, StoreError> {
        let messages = self
            .messages
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps.
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.messages
            .lock()
            .map(|m| m.len())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
