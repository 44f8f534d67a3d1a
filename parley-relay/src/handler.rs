//! Typed dispatch of inbound events for one connection.
//!
//! Each connection task owns one [`EventHandler`]. Every failure is turned
//! into an `error` reply here, so nothing a client sends can take down the
//! task or touch another connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryEngine, DeliveryError};
use crate::identity::Identity;
use crate::protocol::{ClientEvent, ErrorCode, ProtocolError, ServerEvent};
use crate::session::{ConnectionState, Session, SessionError};

/// Whether a message's declared sender must match the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderPolicy {
    /// Accept any declared sender
    Trust,
    /// Sender must be one of the identities this connection joined
    #[default]
    Enforce,
}

impl FromStr for SenderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trust" => Ok(Self::Trust),
            "enforce" => Ok(Self::Enforce),
            other => Err(format!("unknown sender policy '{other}' (expected trust|enforce)")),
        }
    }
}

impl fmt::Display for SenderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trust => f.write_str("trust"),
            Self::Enforce => f.write_str("enforce"),
        }
    }
}

pub struct EventHandler {
    session: Session,
    engine: DeliveryEngine,
    policy: SenderPolicy,
}

impl EventHandler {
    pub fn new(session: Session, engine: DeliveryEngine, policy: SenderPolicy) -> Self {
        Self {
            session,
            engine,
            policy,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Decode one text frame and dispatch it.
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerEvent> {
        match ClientEvent::decode(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                log::warn!("Dropping event on connection {}: {e}", self.session.id());
                Some(protocol_error(e))
            }
        }
    }

    /// Dispatch one event. Returns the reply for this connection, if any.
    pub async fn handle(&mut self, event: ClientEvent) -> Option<ServerEvent> {
        log::debug!("Connection {} → {}", self.session.id(), event.name());
        let result = match event {
            ClientEvent::Join { identity } => self
                .session
                .join(identity.clone())
                .await
                .map(|_| ServerEvent::Joined { identity })
                .map_err(session_error),
            ClientEvent::Leave { identity } => self
                .session
                .leave(&identity)
                .await
                .map(|_| ServerEvent::Left { identity })
                .map_err(session_error),
            ClientEvent::SendMessage {
                sender,
                receiver,
                content,
            } => match self.check_sender(&sender) {
                Ok(()) => self
                    .engine
                    .send(sender, receiver, content)
                    .await
                    .map(|message| ServerEvent::MessageSent { message })
                    .map_err(delivery_error),
                Err(reply) => Err(reply),
            },
            ClientEvent::PostMessage {
                sender,
                receiver,
                content,
            } => match self.check_sender(&sender) {
                Ok(()) => self
                    .engine
                    .post(sender, receiver, content)
                    .await
                    .map(|message| ServerEvent::MessageSaved { message })
                    .map_err(delivery_error),
                Err(reply) => Err(reply),
            },
            ClientEvent::FetchHistory { identity, peer } => self
                .engine
                .history(identity.clone(), peer.clone())
                .await
                .map(|messages| ServerEvent::History {
                    identity,
                    peer,
                    messages,
                })
                .map_err(delivery_error),
            ClientEvent::Ping => Ok(ServerEvent::Pong),
        };

        Some(result.unwrap_or_else(|reply| reply))
    }

    /// Tear down the session on disconnect.
    pub async fn close(&mut self) {
        self.session.close().await;
    }

    fn check_sender(&self, sender: &Identity) -> Result<(), ServerEvent> {
        self.session_open()?;
        if self.policy == SenderPolicy::Enforce && !self.session.is_joined_as(sender) {
            log::warn!(
                "Connection {} tried to send as {sender} without joining",
                self.session.id()
            );
            return Err(ServerEvent::error(
                ErrorCode::SenderMismatch,
                format!("connection has not joined as '{sender}'"),
            ));
        }
        Ok(())
    }

    fn session_open(&self) -> Result<(), ServerEvent> {
        if self.session.state() == ConnectionState::Closed {
            return Err(session_error(SessionError::Closed(self.session.id())));
        }
        Ok(())
    }
}

fn protocol_error(e: ProtocolError) -> ServerEvent {
    ServerEvent::error(ErrorCode::MalformedEvent, e.to_string())
}

fn session_error(e: SessionError) -> ServerEvent {
    ServerEvent::error(ErrorCode::SessionClosed, e.to_string())
}

fn delivery_error(e: DeliveryError) -> ServerEvent {
    match e {
        DeliveryError::Persistence(_) => ServerEvent::error(ErrorCode::Persistence, e.to_string()),
        DeliveryError::Protocol(e) => protocol_error(e),
    }
}
