//! Connectivity events emitted by a chat transport.

use chrono::{DateTime, Utc};

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The chat network invalidated the stored credentials. Reconnecting is
    /// pointless until a human re-authenticates the device.
    LoggedOut,
    /// Any other closure (network drop, bridge restart, remote hangup).
    ConnectionLost(String),
}

impl CloseReason {
    /// Whether this closure means the credentials are gone for good.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, CloseReason::LoggedOut)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::LoggedOut => write!(f, "logged-out"),
            CloseReason::ConnectionLost(detail) => write!(f, "connection lost: {}", detail),
        }
    }
}

/// The closed set of connectivity events a transport can report.
///
/// Dispatched synchronously into the connection supervisor's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The chat session is established and sends may proceed.
    Open,
    /// The chat session closed.
    Closed { reason: CloseReason },
    /// The transport rotated its stored session credentials. The transport
    /// persists them itself; the supervisor only observes.
    CredentialsUpdate,
}

/// Receipt returned for a delivered message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Transport-assigned (or correlation) id of the delivered message.
    pub message_id: String,
    /// When the transport acknowledged the send.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_is_detected() {
        assert!(CloseReason::LoggedOut.is_logged_out());
        assert!(!CloseReason::ConnectionLost("reset".to_string()).is_logged_out());
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(CloseReason::LoggedOut.to_string(), "logged-out");
        assert_eq!(
            CloseReason::ConnectionLost("reset by peer".to_string()).to_string(),
            "connection lost: reset by peer"
        );
    }

    #[test]
    fn events_compare_by_value() {
        assert_eq!(TransportEvent::Open, TransportEvent::Open);
        assert_ne!(
            TransportEvent::Open,
            TransportEvent::Closed {
                reason: CloseReason::LoggedOut
            }
        );
    }
}
