//! Chat-network transport capability.
//!
//! The gateway does not implement the chat protocol itself. This crate
//! defines the small capability surface the rest of the daemon programs
//! against — open a connection, send text to an address, observe a closed
//! set of connectivity events — plus [`BridgeTransport`], the production
//! adapter that speaks JSON over a WebSocket to a local transport bridge.
//!
//! Reconnection policy deliberately does NOT live here: a transport reports
//! `Closed` and stays down until `connect` is called again. The connection
//! supervisor owns retries and backoff.

mod bridge;
mod error;
mod events;

pub use bridge::{BridgeMessage, BridgeMessageType, BridgeTransport};
pub use error::{TransportError, TransportResult};
pub use events::{CloseReason, SendReceipt, TransportEvent};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Capability handle for a stateful chat-network connection.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Establish the underlying session.
    ///
    /// Connectivity changes are delivered on `events` until the session
    /// closes. A successful return means the transport link is up; the
    /// chat session itself is up once [`TransportEvent::Open`] arrives.
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> TransportResult<()>;

    /// Send a text message to a normalized destination address.
    async fn send_text(&self, address: &str, body: &str) -> TransportResult<SendReceipt>;

    /// Release the session. Idempotent.
    async fn disconnect(&self);
}
