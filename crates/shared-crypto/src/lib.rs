//! # Shared Crypto - Signing and Hashing Primitives
//!
//! Cryptographic building blocks used across the Trellis workspace:
//!
//! - **Ed25519 signatures** for membership and invitation tokens
//! - **SHA-256** for deriving node identifiers from public keys
//! - **SHA-1** for deriving data keys and topic identifiers from strings
//!
//! The two hash functions serve disjoint purposes and must never be
//! swapped: node identifiers come from public keys via SHA-256 truncation,
//! while storage keys and topic identifiers come from application strings
//! via SHA-1. Wire-received peer identifiers are never hashed at all.

pub mod errors;
pub mod hashing;
pub mod signatures;

pub use errors::CryptoError;
pub use hashing::{sha1_digest, sha256_digest};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
