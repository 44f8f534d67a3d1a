//! WebSocket relay client.
//!
//! Thin typed wrapper over one relay connection: outbound calls encode a
//! [`ClientEvent`], and a background reader task decodes every inbound
//! frame into a [`ServerEvent`] queue.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::identity::{Identity, IdentityError};
use crate::protocol::{ClientEvent, ProtocolError, ServerEvent};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("connection closed")]
    Closed,
    #[error("timed out waiting for server event")]
    Timeout,
}

pub struct RelayClient {
    writer: WsWriter,
    events: mpsc::Receiver<ServerEvent>,
    reader: JoinHandle<()>,
}

impl RelayClient {
    /// Open a connection to `url` (e.g. `ws://127.0.0.1:5000`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (writer, mut ws_reader) = ws_stream.split();
        let (event_tx, events) = mpsc::channel(256);

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Self {
            writer,
            events,
            reader,
        })
    }

    pub async fn send_event(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        self.send_raw(&event.encode()?).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.writer.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    pub async fn join(&mut self, identity: &str) -> Result<(), ClientError> {
        let identity = Identity::parse(identity)?;
        self.send_event(&ClientEvent::Join { identity }).await
    }

    pub async fn leave(&mut self, identity: &str) -> Result<(), ClientError> {
        let identity = Identity::parse(identity)?;
        self.send_event(&ClientEvent::Leave { identity }).await
    }

    pub async fn send_message(
        &mut self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let event = ClientEvent::SendMessage {
            sender: Identity::parse(sender)?,
            receiver: Identity::parse(receiver)?,
            content: content.to_string(),
        };
        self.send_event(&event).await
    }

    pub async fn post_message(
        &mut self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let event = ClientEvent::PostMessage {
            sender: Identity::parse(sender)?,
            receiver: Identity::parse(receiver)?,
            content: content.to_string(),
        };
        self.send_event(&event).await
    }

    pub async fn fetch_history(&mut self, identity: &str, peer: &str) -> Result<(), ClientError> {
        let event = ClientEvent::FetchHistory {
            identity: Identity::parse(identity)?,
            peer: Identity::parse(peer)?,
        };
        self.send_event(&event).await
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.send_event(&ClientEvent::Ping).await
    }

    /// Next event from the server, waiting at most `wait`.
    pub async fn next_event(&mut self, wait: Duration) -> Result<ServerEvent, ClientError> {
        match tokio::time::timeout(wait, self.events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Event already received, if any, without waiting.
    pub fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// Send a close frame and stop the reader.
    pub async fn close(mut self) -> Result<(), ClientError> {
        let result = self.writer.send(Message::Close(None)).await;
        self.reader.abort();
        result.map_err(ClientError::from)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
