//! Pub/sub errors.
//!
//! Every join-phase failure surfaces with remediation hints — these are
//! the failures an application developer hits first, and "it failed" is
//! not an answer.

use shared_types::{ErrorCategory, TrellisError};
use thiserror::Error;
use tr_05_dht::DhtError;

/// Errors from subscribe, publish, and unsubscribe.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PubsubError {
    /// The DHT has not reached the running state.
    #[error("DHT not ready (state {state})")]
    DhtNotReady { state: String },

    /// Zero connected peers.
    #[error("Network isolation: no connected peers")]
    NetworkIsolation,

    /// The coordinator could not be reached after retries.
    #[error("Coordinator unavailable for topic {topic}")]
    CoordinatorUnavailable { topic: String },

    /// A join or publish attempt timed out.
    #[error("Operation timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The coordinator refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Anything else.
    #[error("Pub/sub failure: {0}")]
    Internal(String),
}

impl PubsubError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PubsubError::CoordinatorUnavailable { .. } | PubsubError::Timeout { .. }
        )
    }
}

impl From<DhtError> for PubsubError {
    fn from(e: DhtError) -> Self {
        match e {
            DhtError::RpcTimeout(_) => PubsubError::Timeout { attempts: 1 },
            DhtError::Isolated => PubsubError::NetworkIsolation,
            DhtError::NotReady(state) => PubsubError::DhtNotReady { state },
            DhtError::Unreachable(peer) | DhtError::Backpressure(peer) => {
                PubsubError::CoordinatorUnavailable { topic: peer }
            }
            DhtError::Remote { message, .. } => PubsubError::Rejected(message),
            DhtError::Protocol(message) => PubsubError::Internal(message),
        }
    }
}

impl From<PubsubError> for TrellisError {
    fn from(e: PubsubError) -> Self {
        let (category, remediation): (ErrorCategory, Vec<String>) = match &e {
            PubsubError::DhtNotReady { .. } => (
                ErrorCategory::NetworkIsolated,
                vec![
                    "wait for the DHT to reach the running state before joining topics".into(),
                    "check the bootstrap connection if the state is stuck".into(),
                ],
            ),
            PubsubError::NetworkIsolation => (
                ErrorCategory::NetworkIsolated,
                vec![
                    "connect to at least one peer before joining topics".into(),
                    "verify the bootstrap server is reachable".into(),
                ],
            ),
            PubsubError::CoordinatorUnavailable { .. } => (
                ErrorCategory::CoordinatorUnavailable,
                vec![
                    "retry; a new coordinator is elected after peer failure".into(),
                    "check overlay connectivity if this persists".into(),
                ],
            ),
            PubsubError::Timeout { .. } => (
                ErrorCategory::Timeout,
                vec![
                    "check connectivity".into(),
                    "retry the join".into(),
                    "increase the join timeout for slow links".into(),
                ],
            ),
            PubsubError::Rejected(_) => (
                ErrorCategory::InvalidToken,
                vec!["verify the topic id and this node's authorization".into()],
            ),
            PubsubError::Internal(_) => (
                ErrorCategory::Internal,
                vec!["report this; pub/sub internal failures always carry context".into()],
            ),
        };
        TrellisError::with_remediation(category, e.to_string(), remediation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_failures_carry_remediation() {
        let errors = [
            PubsubError::DhtNotReady { state: "new".into() },
            PubsubError::NetworkIsolation,
            PubsubError::CoordinatorUnavailable { topic: "t".into() },
            PubsubError::Timeout { attempts: 3 },
            PubsubError::Rejected("bad topic".into()),
            PubsubError::Internal("x".into()),
        ];
        for e in errors {
            let surfaced: TrellisError = e.into();
            assert!(!surfaced.remediation.is_empty());
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(PubsubError::Timeout { attempts: 1 }.is_retryable());
        assert!(PubsubError::CoordinatorUnavailable { topic: "t".into() }.is_retryable());
        assert!(!PubsubError::NetworkIsolation.is_retryable());
        assert!(!PubsubError::Rejected("no".into()).is_retryable());
    }
}
