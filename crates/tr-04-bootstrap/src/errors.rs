//! Bootstrap errors.

use shared_types::{ErrorCategory, TrellisError};
use thiserror::Error;

/// Errors from the bootstrap exchange.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootstrapError {
    /// Could not reach the coordinator.
    #[error("Bootstrap server unreachable: {0}")]
    Unreachable(String),

    /// The exchange did not complete in time.
    #[error("Bootstrap exchange timed out")]
    Timeout,

    /// The coordinator refused this build. Fatal; do not retry.
    #[error("Version rejected by coordinator: client {client}, server {server}")]
    VersionRejected { client: String, server: String },

    /// The coordinator closed the link mid-exchange.
    #[error("Coordinator closed the connection")]
    ConnectionClosed,

    /// Malformed or unexpected frame.
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl BootstrapError {
    /// Fatal errors must not be retried by the join loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BootstrapError::VersionRejected { .. })
    }
}

impl From<BootstrapError> for TrellisError {
    fn from(e: BootstrapError) -> Self {
        let (category, remediation): (ErrorCategory, Vec<String>) = match &e {
            BootstrapError::Unreachable(_) => (
                ErrorCategory::Unreachable,
                vec![
                    "verify the bootstrap server address and that the process is up".into(),
                    "check firewall rules between this node and the coordinator".into(),
                ],
            ),
            BootstrapError::Timeout => (
                ErrorCategory::Timeout,
                vec![
                    "check connectivity to the bootstrap server".into(),
                    "retry; the join loop backs off automatically".into(),
                ],
            ),
            BootstrapError::VersionRejected { .. } => (
                ErrorCategory::VersionIncompatible,
                vec![
                    "upgrade this node to the network's protocol version".into(),
                    "do not retry until the build matches".into(),
                ],
            ),
            BootstrapError::ConnectionClosed => (
                ErrorCategory::Unreachable,
                vec!["reconnect; the coordinator may have restarted".into()],
            ),
            BootstrapError::Protocol(_) => (
                ErrorCategory::Internal,
                vec!["report this; coordinator and node disagree on the protocol".into()],
            ),
        };
        TrellisError::with_remediation(category, e.to_string(), remediation)
    }
}
