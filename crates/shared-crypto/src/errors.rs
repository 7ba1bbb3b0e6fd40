//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from signing and verification primitives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The bytes do not decode to a valid Ed25519 point.
    #[error("Invalid public key encoding")]
    InvalidPublicKey,

    /// A signature did not verify against the given key and message.
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Hex input had the wrong length or contained non-hex characters.
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),
}
