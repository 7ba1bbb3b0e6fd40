//! Membership token issuance.
//!
//! Two variants exist: a genesis token (the first member, self-signed or
//! minted by the bootstrap coordinator on genesis election) and a
//! chained token signed by an already-admitted member. Signing covers a
//! domain-separated canonical byte string, never the JSON rendering, so
//! field ordering can never break verification.

use crate::identity::NodeIdentity;
use shared_types::{MembershipToken, NodeId};

/// Default membership lifetime: 30 days.
pub const MEMBERSHIP_TTL_SECS: u64 = 30 * 24 * 3600;

/// Canonical byte string a membership signature covers.
pub(crate) fn membership_signing_bytes(
    node_id: &NodeId,
    issuer: &NodeId,
    is_genesis: bool,
    issued_at: u64,
    expires: u64,
) -> Vec<u8> {
    format!("trellis-membership\n{node_id}\n{issuer}\n{is_genesis}\n{issued_at}\n{expires}")
        .into_bytes()
}

/// Mint the genesis token: issuer and subject are the same identity.
pub fn issue_genesis_token(identity: &NodeIdentity, now: u64) -> MembershipToken {
    issue_genesis_token_for(identity, identity.node_id(), now)
}

/// Mint a genesis token for `subject`, signed by `issuer_identity`.
///
/// Used by the bootstrap coordinator when it elects the first member of
/// a fresh DHT: the coordinator signs, the joiner is the subject.
pub fn issue_genesis_token_for(
    issuer_identity: &NodeIdentity,
    subject: NodeId,
    now: u64,
) -> MembershipToken {
    let issuer = issuer_identity.node_id();
    let expires = now + MEMBERSHIP_TTL_SECS;
    let signature = issuer_identity.sign(&membership_signing_bytes(
        &subject, &issuer, true, now, expires,
    ));
    MembershipToken {
        node_id: subject,
        issuer,
        issuer_public_key: issuer_identity.public_key(),
        is_genesis: true,
        issued_at: now,
        expires,
        signature,
    }
}

/// Mint a chained membership token for a joiner, signed by a member.
pub fn issue_membership_token(
    member_identity: &NodeIdentity,
    joiner: NodeId,
    now: u64,
) -> MembershipToken {
    let issuer = member_identity.node_id();
    let expires = now + MEMBERSHIP_TTL_SECS;
    let signature = member_identity.sign(&membership_signing_bytes(
        &joiner, &issuer, false, now, expires,
    ));
    MembershipToken {
        node_id: joiner,
        issuer,
        issuer_public_key: member_identity.public_key(),
        is_genesis: false,
        issued_at: now,
        expires,
        signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_token_is_self_issued() {
        let identity = NodeIdentity::generate();
        let token = issue_genesis_token(&identity, 1000);
        assert!(token.is_genesis);
        assert_eq!(token.node_id, token.issuer);
        assert_eq!(token.issuer, identity.node_id());
    }

    #[test]
    fn coordinator_issued_genesis_names_the_joiner() {
        let coordinator = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let token = issue_genesis_token_for(&coordinator, joiner.node_id(), 1000);
        assert!(token.is_genesis);
        assert_eq!(token.node_id, joiner.node_id());
        assert_eq!(token.issuer, coordinator.node_id());
    }

    #[test]
    fn chained_token_expires_after_ttl() {
        let member = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let token = issue_membership_token(&member, joiner.node_id(), 1000);
        assert!(!token.is_genesis);
        assert_eq!(token.expires, 1000 + MEMBERSHIP_TTL_SECS);
        assert!(!token.is_expired(1000));
        assert!(token.is_expired(token.expires));
    }
}
