//! # Identity Subsystem
//!
//! Who a node is and how it proves admission:
//!
//! - [`NodeIdentity`] — an Ed25519 keypair whose public key derives the
//!   160-bit node id (`truncate160(SHA256(public_key))`)
//! - [`membership`] — genesis and invitation-derived membership tokens
//! - [`invitation`] — single-use, short-lived invitations
//! - [`TokenVerifier`] — verification chaining every token back to a
//!   self-signed genesis or an already-admitted member
//! - [`BlobStore`] — the key→blob persistence contract the identity and
//!   durable topic state go through
//!
//! The id↔key binding does the heavy lifting: an issuer's public key is
//! only accepted if it hashes to the issuer's id, so tokens cannot be
//! re-signed by an impostor.

pub mod errors;
pub mod identity;
pub mod invitation;
pub mod membership;
pub mod nonce;
pub mod store;
pub mod verifier;

pub use errors::IdentityError;
pub use identity::NodeIdentity;
pub use invitation::issue_invitation;
pub use membership::{issue_genesis_token, issue_membership_token};
pub use nonce::NonceLedger;
pub use store::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use verifier::TokenVerifier;
