//! WebSocket adapter for the local transport bridge process.

use crate::{ChatTransport, CloseReason, SendReceipt, TransportError, TransportEvent, TransportResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Reason string the bridge reports when the chat network invalidated the
/// stored credentials.
const LOGGED_OUT_REASON: &str = "logged-out";

/// Capacity of the outbound frame channel.
const SEND_QUEUE_CAPACITY: usize = 64;

/// Bridge frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessageType {
    Connect,
    Connected,
    SendText,
    SendResult,
    Disconnected,
    CredentialsUpdate,
}

/// A JSON frame exchanged with the transport bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    #[serde(rename = "type")]
    pub msg_type: BridgeMessageType,
    /// Correlation id pairing a SEND_TEXT with its SEND_RESULT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeMessage {
    /// Create a bare frame of the given type.
    pub fn new(msg_type: BridgeMessageType) -> Self {
        Self {
            msg_type,
            id: None,
            address: None,
            body: None,
            reason: None,
            success: None,
            error: None,
        }
    }

    /// Create a CONNECT frame.
    pub fn connect() -> Self {
        Self::new(BridgeMessageType::Connect)
    }

    /// Create a SEND_TEXT frame.
    pub fn send_text(id: &str, address: &str, body: &str) -> Self {
        Self {
            msg_type: BridgeMessageType::SendText,
            id: Some(id.to_string()),
            address: Some(address.to_string()),
            body: Some(body.to_string()),
            reason: None,
            success: None,
            error: None,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Map a DISCONNECTED frame's reason string to a [`CloseReason`].
fn close_reason_from_frame(reason: Option<String>) -> CloseReason {
    match reason.as_deref() {
        Some(LOGGED_OUT_REASON) => CloseReason::LoggedOut,
        Some(other) => CloseReason::ConnectionLost(other.to_string()),
        None => CloseReason::ConnectionLost("no reason given".to_string()),
    }
}

type PendingSends = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeMessage>>>>;

/// Production [`ChatTransport`] speaking JSON frames over a WebSocket to a
/// local bridge process that owns the actual chat-network session.
///
/// Sends are correlated by uuid: each SEND_TEXT carries a fresh id and the
/// caller parks on a oneshot until the matching SEND_RESULT arrives. A reader
/// task maps bridge frames to [`TransportEvent`]s; it does not reconnect on
/// its own.
pub struct BridgeTransport {
    url: String,
    sender: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
    pending_sends: PendingSends,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BridgeTransport {
    /// Create a new bridge transport for the given WebSocket URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sender: Arc::new(Mutex::new(None)),
            pending_sends: Arc::new(Mutex::new(HashMap::new())),
            reader_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChatTransport for BridgeTransport {
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> TransportResult<()> {
        info!(url = %self.url, "Connecting to transport bridge");

        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(SEND_QUEUE_CAPACITY);

        write
            .send(Message::Text(BridgeMessage::connect().to_json()?.into()))
            .await?;

        *self.sender.lock().await = Some(msg_tx.clone());

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let sender = self.sender.clone();
        let pending = self.pending_sends.clone();
        let pong_tx = msg_tx;

        let reader = tokio::spawn(async move {
            // Set once a DISCONNECTED frame has been delivered upstream, so
            // socket teardown afterwards does not produce a second close.
            let mut session_closed = false;

            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match BridgeMessage::from_json(&text) {
                        Ok(msg) => match msg.msg_type {
                            BridgeMessageType::Connected => {
                                info!("Chat session established");
                                let _ = events.send(TransportEvent::Open).await;
                            }
                            BridgeMessageType::Disconnected => {
                                let reason = close_reason_from_frame(msg.reason);
                                info!(reason = %reason, "Chat session closed");
                                session_closed = true;
                                let _ = events.send(TransportEvent::Closed { reason }).await;
                                break;
                            }
                            BridgeMessageType::CredentialsUpdate => {
                                debug!("Bridge rotated session credentials");
                                let _ = events.send(TransportEvent::CredentialsUpdate).await;
                            }
                            BridgeMessageType::SendResult => {
                                if let Some(id) = msg.id.clone() {
                                    if let Some(waiter) = pending.lock().await.remove(&id) {
                                        let _ = waiter.send(msg);
                                    } else {
                                        debug!(id = %id, "SEND_RESULT for unknown correlation id");
                                    }
                                }
                            }
                            BridgeMessageType::Connect | BridgeMessageType::SendText => {
                                debug!(msg_type = ?msg.msg_type, "Ignoring client-bound frame from bridge");
                            }
                        },
                        Err(e) => {
                            warn!(error = %e, "Failed to parse bridge frame");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("Bridge closed the connection");
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(Message::Pong(data)).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Bridge WebSocket error");
                        break;
                    }
                }
            }

            writer_task.abort();
            *sender.lock().await = None;
            // Waiters observe the dropped oneshot as TransportError::Closed.
            pending.lock().await.clear();

            if !session_closed {
                let _ = events
                    .send(TransportEvent::Closed {
                        reason: CloseReason::ConnectionLost("bridge socket closed".to_string()),
                    })
                    .await;
            }
        });

        if let Some(previous) = self.reader_task.lock().await.replace(reader) {
            previous.abort();
        }

        Ok(())
    }

    async fn send_text(&self, address: &str, body: &str) -> TransportResult<SendReceipt> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_sends.lock().await.insert(id.clone(), tx);

        let frame = BridgeMessage::send_text(&id, address, body).to_json()?;
        if sender.send(Message::Text(frame.into())).await.is_err() {
            self.pending_sends.lock().await.remove(&id);
            return Err(TransportError::Closed);
        }

        let result = rx.await.map_err(|_| TransportError::Closed)?;

        if result.success == Some(true) {
            Ok(SendReceipt {
                message_id: result.id.unwrap_or(id),
                timestamp: chrono::Utc::now(),
            })
        } else {
            Err(TransportError::Send(
                result
                    .error
                    .unwrap_or_else(|| "bridge rejected the send".to_string()),
            ))
        }
    }

    async fn disconnect(&self) {
        if let Some(sender) = self.sender.lock().await.take() {
            drop(sender);
        }
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        self.pending_sends.lock().await.clear();
        info!("Disconnected from transport bridge");
    }
}
