//! Invitation token issuance.
//!
//! An invitation is a single-use, short-lived grant a member extends to
//! one specific joiner. The joiner presents it at the first DHT
//! handshake; the inviter (or any verifier holding the member set)
//! checks it and redeems the nonce.

use crate::identity::NodeIdentity;
use shared_types::{InvitationToken, NodeId};
use uuid::Uuid;

/// Invitations expire quickly: 10 minutes.
pub const INVITATION_TTL_SECS: u64 = 10 * 60;

/// Canonical byte string an invitation signature covers.
pub(crate) fn invitation_signing_bytes(
    inviter: &NodeId,
    invitee: &NodeId,
    issued_at: u64,
    expires: u64,
    nonce: &str,
) -> Vec<u8> {
    format!("trellis-invitation\n{inviter}\n{invitee}\n{issued_at}\n{expires}\n{nonce}")
        .into_bytes()
}

/// Mint an invitation for `invitee`, signed by the inviting member.
pub fn issue_invitation(
    member_identity: &NodeIdentity,
    invitee: NodeId,
    now: u64,
) -> InvitationToken {
    let inviter = member_identity.node_id();
    let expires = now + INVITATION_TTL_SECS;
    let nonce = Uuid::new_v4().to_string();
    let signature = member_identity.sign(&invitation_signing_bytes(
        &inviter, &invitee, now, expires, &nonce,
    ));
    InvitationToken {
        inviter,
        invitee,
        inviter_public_key: member_identity.public_key(),
        issued_at: now,
        expires,
        nonce,
        signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_binds_inviter_and_invitee() {
        let member = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let token = issue_invitation(&member, joiner.node_id(), 5000);

        assert_eq!(token.inviter, member.node_id());
        assert_eq!(token.invitee, joiner.node_id());
        assert_eq!(token.expires, 5000 + INVITATION_TTL_SECS);
    }

    #[test]
    fn nonces_are_unique_per_invitation() {
        let member = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let a = issue_invitation(&member, joiner.node_id(), 5000);
        let b = issue_invitation(&member, joiner.node_id(), 5000);
        assert_ne!(a.nonce, b.nonce);
    }
}
