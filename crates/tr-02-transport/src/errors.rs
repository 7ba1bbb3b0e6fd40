//! Transport errors.

use shared_types::{ErrorCategory, TrellisError};
use thiserror::Error;

/// Errors from dialing, handshaking, and sending.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer actively refused the connection.
    #[error("Connection refused by {0}")]
    Refused(String),

    /// Dial or handshake did not complete in time.
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// No route to the peer.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// Protocol or build version gate failed.
    #[error("Version incompatible: local {local}, remote {remote}")]
    VersionIncompatible { local: String, remote: String },

    /// The HELLO exchange was malformed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// No active link to the peer.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// The peer's send buffer was full; the frame was dropped.
    #[error("Send buffer full for {0}; frame dropped")]
    BackpressureDropped(String),

    /// Frame exceeded the wire limit or failed to parse.
    #[error("Bad frame: {0}")]
    BadFrame(String),
}

impl From<TransportError> for TrellisError {
    fn from(e: TransportError) -> Self {
        let category = match &e {
            TransportError::Refused(_) => ErrorCategory::TransportRefused,
            TransportError::Timeout(_) => ErrorCategory::Timeout,
            TransportError::Unreachable(_) | TransportError::NotConnected(_) => {
                ErrorCategory::Unreachable
            }
            TransportError::VersionIncompatible { .. } => ErrorCategory::VersionIncompatible,
            TransportError::BackpressureDropped(_) => ErrorCategory::BackpressureDropped,
            TransportError::HandshakeFailed(_) | TransportError::BadFrame(_) => {
                ErrorCategory::Internal
            }
        };
        TrellisError::new(category, e.to_string())
    }
}
