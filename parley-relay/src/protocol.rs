//! JSON wire protocol.
//!
//! Every WebSocket text frame carries one event:
//! ```text
//! { "event": "<kebab-case name>", "data": { ...payload... } }
//! ```
//!
//! Inbound events are validated while decoding: a frame that is not JSON,
//! names an unknown event, lacks a required field, carries an invalid
//! identity, or has empty message content is rejected as
//! [`ProtocolError::Malformed`] before it reaches the registry or the
//! delivery engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identity;
use crate::message::Message;
use crate::registry::Frame;

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Register this connection under `identity`
    Join { identity: Identity },
    /// Drop this connection from the room of `identity`
    Leave { identity: Identity },
    /// Persist and deliver live to the receiver's connections
    SendMessage {
        sender: Identity,
        receiver: Identity,
        content: String,
    },
    /// Persist only, no live delivery
    PostMessage {
        sender: Identity,
        receiver: Identity,
        content: String,
    },
    /// Conversation between `identity` and `peer`, oldest first
    FetchHistory { identity: Identity, peer: Identity },
    Ping,
}

impl ClientEvent {
    /// Parse and validate one inbound frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let event: Self =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::SendMessage { content, .. } | Self::PostMessage { content, .. }
                if content.is_empty() =>
            {
                Err(ProtocolError::Malformed("content must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::SendMessage { .. } => "send-message",
            Self::PostMessage { .. } => "post-message",
            Self::FetchHistory { .. } => "fetch-history",
            Self::Ping => "ping",
        }
    }
}

/// Machine-readable error category surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    MalformedEvent,
    Persistence,
    SenderMismatch,
    SessionClosed,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Joined { identity: Identity },
    Left { identity: Identity },
    /// Live delivery to the receiver's connections
    ReceiveMessage {
        sender: Identity,
        content: String,
        #[serde(rename = "createdAt")]
        created_at: u64,
    },
    /// Acknowledges a `send-message` to the sending connection
    MessageSent { message: Message },
    /// Acknowledges a `post-message`
    MessageSaved { message: Message },
    History {
        identity: Identity,
        peer: Identity,
        messages: Vec<Message>,
    },
    Pong,
    Error { code: ErrorCode, reason: String },
}

impl ServerEvent {
    /// Live-delivery payload for a persisted message.
    pub fn receive(message: &Message) -> Self {
        Self::ReceiveMessage {
            sender: message.sender.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }

    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Error {
            code,
            reason: reason.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Encode once into a shareable frame.
    pub fn frame(&self) -> Result<Frame, ProtocolError> {
        self.encode().map(Frame::from)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("encode error: {0}")]
    Encode(String),
}
