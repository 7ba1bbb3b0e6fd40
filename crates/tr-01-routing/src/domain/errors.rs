//! Domain errors for the routing layer.

use thiserror::Error;

/// Errors from routing table operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Peer not present in the table.
    #[error("Peer not found in routing table")]
    PeerNotFound,

    /// Attempted to add the local node to its own table.
    #[error("Cannot add local node to routing table")]
    SelfEntry,

    /// Peer is currently banned.
    #[error("Peer is currently banned")]
    PeerBanned,

    /// Wire identifier failed the durable-id check.
    #[error("Invalid wire identifier: {0}")]
    InvalidWireId(String),

    /// Table consistency validation failed.
    #[error("Routing table inconsistency: {0}")]
    Inconsistent(String),
}
