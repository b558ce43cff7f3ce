//! Transport error types.

use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No session is established
    #[error("Not connected to transport")]
    NotConnected,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session closed while an operation was in flight
    #[error("Transport session closed")]
    Closed,

    /// The bridge rejected or failed a send
    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
