//! The surfaced error taxonomy.
//!
//! Transport-level failures are absorbed by whichever component owns the
//! peer record (failure counters, possible removal). What crosses an API
//! boundary to an application is always a [`TrellisError`]: a category
//! from the closed set below, a message, and remediation hints. Join
//! surfaces (pub/sub joins, the bootstrap join phase) are required to
//! populate remediation for every failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure categories crossing the API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Identifier was not a 40-character hex string.
    InvalidIdFormat,
    /// Token failed signature or chain verification.
    InvalidToken,
    /// Token was past its expiry.
    ExpiredToken,
    /// Token subject did not match the presenting peer.
    TokenMismatch,
    /// Protocol or build version gate failed; fatal for the connection.
    VersionIncompatible,
    /// An RPC or join did not complete in time.
    Timeout,
    /// No route to the peer.
    Unreachable,
    /// The peer actively refused the connection.
    TransportRefused,
    /// Bucket had no room and the newcomer was dropped.
    RoutingTableFull,
    /// Zero connected peers.
    NetworkIsolated,
    /// The topic coordinator could not be reached.
    CoordinatorUnavailable,
    /// Message already delivered; discarded, not an error in itself.
    DuplicateMessage,
    /// Outbound frame dropped because the peer's send buffer was full.
    BackpressureDropped,
    /// Anything else. Always carries remediation text.
    Internal,
}

impl ErrorCategory {
    /// Whether a lookup or join may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::Unreachable
                | ErrorCategory::TransportRefused
                | ErrorCategory::CoordinatorUnavailable
                | ErrorCategory::BackpressureDropped
        )
    }

    /// Default remediation hints for this category.
    fn default_remediation(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            ErrorCategory::InvalidIdFormat => {
                &["use the 40-character hex form of the node id", "never rehash a wire-received id"]
            }
            ErrorCategory::InvalidToken => {
                &["request a fresh invitation from a current member", "verify the issuer is an admitted member"]
            }
            ErrorCategory::ExpiredToken => &["request a fresh token; invitations expire within minutes"],
            ErrorCategory::TokenMismatch => {
                &["present a token issued to this node id", "tokens are not transferable"]
            }
            ErrorCategory::VersionIncompatible => {
                &["upgrade to the network's protocol version", "matching builds are required on both sides"]
            }
            ErrorCategory::Timeout => {
                &["check connectivity", "retry the operation", "increase the operation timeout"]
            }
            ErrorCategory::Unreachable => {
                &["verify the peer's listening address", "the peer may have left the network; retry with another peer"]
            }
            ErrorCategory::TransportRefused => {
                &["the peer may be at its connection cap; retry later", "verify protocol versions match"]
            }
            ErrorCategory::RoutingTableFull => {
                &["no action needed; resident peers keep their slots until they go stale"]
            }
            ErrorCategory::NetworkIsolated => {
                &["check connectivity to the bootstrap server", "wait for at least one peer connection before joining topics"]
            }
            ErrorCategory::CoordinatorUnavailable => {
                &["retry; coordinator election repeats after peer failure", "check that the DHT reports a running state"]
            }
            ErrorCategory::DuplicateMessage => &["none; duplicates are dropped by design"],
            ErrorCategory::BackpressureDropped => {
                &["slow the send rate toward this peer", "the peer may be overloaded or backgrounded"]
            }
            ErrorCategory::Internal => &["report this; internal failures always carry context"],
        };
        hints.iter().map(|s| s.to_string()).collect()
    }
}

/// The discriminated failure result every public API returns.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{category:?}: {message}")]
pub struct TrellisError {
    /// Failure classification.
    pub category: ErrorCategory,

    /// Human-readable description.
    pub message: String,

    /// Concrete next steps. Never empty.
    pub remediation: Vec<String>,
}

impl TrellisError {
    /// Build an error with the category's default remediation.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            remediation: category.default_remediation(),
            category,
            message: message.into(),
        }
    }

    /// Build an error with explicit remediation hints.
    pub fn with_remediation(
        category: ErrorCategory,
        message: impl Into<String>,
        remediation: Vec<String>,
    ) -> Self {
        let mut e = Self::new(category, message);
        if !remediation.is_empty() {
            e.remediation = remediation;
        }
        e
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unreachable, message)
    }

    pub fn network_isolated(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NetworkIsolated, message)
    }

    pub fn coordinator_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::CoordinatorUnavailable, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidToken, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }

    /// Whether the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_remediation() {
        let categories = [
            ErrorCategory::InvalidIdFormat,
            ErrorCategory::InvalidToken,
            ErrorCategory::ExpiredToken,
            ErrorCategory::TokenMismatch,
            ErrorCategory::VersionIncompatible,
            ErrorCategory::Timeout,
            ErrorCategory::Unreachable,
            ErrorCategory::TransportRefused,
            ErrorCategory::RoutingTableFull,
            ErrorCategory::NetworkIsolated,
            ErrorCategory::CoordinatorUnavailable,
            ErrorCategory::DuplicateMessage,
            ErrorCategory::BackpressureDropped,
            ErrorCategory::Internal,
        ];
        for category in categories {
            let err = TrellisError::new(category, "x");
            assert!(!err.remediation.is_empty(), "{category:?} lacks remediation");
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(TrellisError::timeout("t").is_retryable());
        assert!(TrellisError::coordinator_unavailable("c").is_retryable());
        assert!(!TrellisError::invalid_token("t").is_retryable());
        assert!(!TrellisError::new(ErrorCategory::VersionIncompatible, "v").is_retryable());
    }

    #[test]
    fn explicit_remediation_overrides_default() {
        let err = TrellisError::with_remediation(
            ErrorCategory::Timeout,
            "join timed out",
            vec!["wait for the DHT to finish bootstrapping".into()],
        );
        assert_eq!(err.remediation.len(), 1);
    }
}
