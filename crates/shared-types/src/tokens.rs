//! Membership and invitation token records.
//!
//! These are pure wire records; issuance and verification logic lives in
//! the identity crate. A membership token proves admission into the DHT
//! and chains back to a self-signed genesis token. An invitation token is
//! a single-use, short-lived grant bound to one invitee.

use crate::entities::NodeId;
use serde::{Deserialize, Serialize};
use shared_crypto::{Ed25519PublicKey, Ed25519Signature};

/// Signed proof of admission into the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipToken {
    /// The admitted node (subject).
    pub node_id: NodeId,

    /// The admitting node. Equal to `node_id` on a genesis token.
    pub issuer: NodeId,

    /// Public key the signature verifies under.
    pub issuer_public_key: Ed25519PublicKey,

    /// Whether this is the self-signed genesis grant.
    pub is_genesis: bool,

    /// Issue time, unix seconds.
    pub issued_at: u64,

    /// Expiry time, unix seconds.
    pub expires: u64,

    /// Issuer signature over the canonical token bytes.
    pub signature: Ed25519Signature,
}

impl MembershipToken {
    /// Whether the token has expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }
}

/// Single-use, short-lived permission for a specific joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationToken {
    /// The member extending the invitation.
    pub inviter: NodeId,

    /// The invited joiner; no other node may redeem this token.
    pub invitee: NodeId,

    /// Inviter's public key for verification.
    pub inviter_public_key: Ed25519PublicKey,

    /// Issue time, unix seconds.
    pub issued_at: u64,

    /// Expiry time, unix seconds. Invitations are short-lived (minutes).
    pub expires: u64,

    /// Single-use nonce; a redeemed nonce is never accepted again.
    pub nonce: String,

    /// Inviter signature over the canonical token bytes.
    pub signature: Ed25519Signature,
}

impl InvitationToken {
    /// Whether the invitation has expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }
}
