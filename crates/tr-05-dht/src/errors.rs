//! DHT errors.

use shared_types::{ErrorCategory, TrellisError};
use thiserror::Error;

/// Errors from DHT operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DhtError {
    /// An RPC did not complete within its budget.
    #[error("RPC to {0} timed out")]
    RpcTimeout(String),

    /// The peer is not connected and could not be reached.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// The send buffer toward the peer was full.
    #[error("Backpressure toward {0}")]
    Backpressure(String),

    /// Zero connected peers; the operation cannot make progress.
    #[error("Network isolated: no connected peers")]
    Isolated,

    /// The node has not reached the running state.
    #[error("DHT not ready: state is {0}")]
    NotReady(String),

    /// The remote answered with an error frame.
    #[error("Remote error ({category}): {message}")]
    Remote { category: String, message: String },

    /// An unexpected reply type arrived for a request id.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl From<DhtError> for TrellisError {
    fn from(e: DhtError) -> Self {
        let category = match &e {
            DhtError::RpcTimeout(_) => ErrorCategory::Timeout,
            DhtError::Unreachable(_) => ErrorCategory::Unreachable,
            DhtError::Backpressure(_) => ErrorCategory::BackpressureDropped,
            DhtError::Isolated => ErrorCategory::NetworkIsolated,
            DhtError::NotReady(_) => ErrorCategory::NetworkIsolated,
            DhtError::Remote { .. } | DhtError::Protocol(_) => ErrorCategory::Internal,
        };
        TrellisError::new(category, e.to_string())
    }
}
