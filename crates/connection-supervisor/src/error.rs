//! Supervisor error types.

use chat_transport::TransportError;
use thiserror::Error;

/// Supervisor error type.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A send was attempted while the session is not connected
    #[error("Transport unavailable: session is not connected")]
    TransportUnavailable,

    /// The send did not complete within the delivery deadline
    #[error("Send did not complete within the delivery deadline")]
    DeliveryTimeout,

    /// Underlying transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias using SupervisorError.
pub type SupervisorResult<T> = Result<T, SupervisorError>;
