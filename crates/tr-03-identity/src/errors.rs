//! Identity and token errors.

use shared_types::{ErrorCategory, TrellisError};
use thiserror::Error;

/// Errors from identity management and token verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Signature did not verify, or the issuer key does not bind to the
    /// issuer id.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token past its expiry.
    #[error("Token expired at {expires}, now {now}")]
    Expired { expires: u64, now: u64 },

    /// Token subject does not match the presenting peer.
    #[error("Token subject mismatch: token for {subject}, presented by {presenter}")]
    SubjectMismatch { subject: String, presenter: String },

    /// Invitation nonce already redeemed.
    #[error("Invitation nonce already used")]
    NonceReused,

    /// Issuer is neither genesis nor an admitted member.
    #[error("Issuer {0} is not an admitted member")]
    UnknownIssuer(String),

    /// Persistence failure.
    #[error("Blob store failure: {0}")]
    Store(String),
}

impl From<IdentityError> for TrellisError {
    fn from(e: IdentityError) -> Self {
        let category = match &e {
            IdentityError::Expired { .. } => ErrorCategory::ExpiredToken,
            IdentityError::SubjectMismatch { .. } => ErrorCategory::TokenMismatch,
            IdentityError::InvalidToken(_)
            | IdentityError::NonceReused
            | IdentityError::UnknownIssuer(_) => ErrorCategory::InvalidToken,
            IdentityError::Store(_) => ErrorCategory::Internal,
        };
        TrellisError::new(category, e.to_string())
    }
}
