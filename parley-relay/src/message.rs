//! Persisted message record.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;

/// A direct message between two identities. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: Identity,
    pub receiver: Identity,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

impl Message {
    /// Build a new message stamped with the current time.
    pub fn new(sender: Identity, receiver: Identity, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            content: content.into(),
            created_at: now_millis(),
        }
    }

    /// Whether this message belongs to the conversation between `a` and `b`.
    pub fn is_between(&self, a: &Identity, b: &Identity) -> bool {
        (&self.sender == a && &self.receiver == b) || (&self.sender == b && &self.receiver == a)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
