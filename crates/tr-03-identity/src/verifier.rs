//! Token verification with chain-to-genesis semantics.
//!
//! A token is good when:
//!
//! 1. its issuer's public key hashes to the issuer's node id (the
//!    binding no impostor can forge),
//! 2. the signature verifies under that key,
//! 3. the issuer is acceptable: a self-signed genesis, a configured
//!    trusted issuer (the bootstrap coordinator), or a member this
//!    verifier has already admitted, and
//! 4. the token is unexpired and names the presenting peer.
//!
//! Successful verification admits the subject, extending the chain for
//! tokens it issues later.

use crate::errors::IdentityError;
use crate::identity::node_id_from_public_key;
use crate::invitation::invitation_signing_bytes;
use crate::membership::membership_signing_bytes;
use crate::nonce::NonceLedger;
use shared_crypto::Ed25519PublicKey;
use shared_types::{InvitationToken, MembershipToken, NodeId};
use std::collections::HashSet;
use tracing::debug;

/// Verifies membership and invitation tokens against the admitted set.
#[derive(Debug, Default)]
pub struct TokenVerifier {
    /// Members whose issued tokens we accept. Public keys are implied
    /// by the id binding, so ids suffice.
    admitted: HashSet<NodeId>,
    /// Trusted genesis issuers (the bootstrap coordinator's identity).
    trusted_issuers: HashSet<NodeId>,
    /// Single-use ledger for invitation nonces.
    nonces: NonceLedger,
}

impl TokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a genesis issuer (e.g. the bootstrap coordinator id
    /// learned at onboarding).
    pub fn trust_issuer(&mut self, issuer: NodeId) {
        self.trusted_issuers.insert(issuer);
    }

    /// Record an admitted member directly (e.g. ourselves after
    /// receiving our own token).
    pub fn admit(&mut self, member: NodeId) {
        self.admitted.insert(member);
    }

    pub fn is_admitted(&self, member: &NodeId) -> bool {
        self.admitted.contains(member)
    }

    /// Check the id↔key binding for an issuer.
    fn check_binding(id: &NodeId, key: &Ed25519PublicKey) -> Result<(), IdentityError> {
        if node_id_from_public_key(key) != *id {
            return Err(IdentityError::InvalidToken(
                "issuer public key does not bind to issuer id".into(),
            ));
        }
        Ok(())
    }

    /// Verify a membership token presented by `presenter` at `now`.
    ///
    /// On success the subject is admitted into the member set.
    pub fn verify_membership(
        &mut self,
        token: &MembershipToken,
        presenter: NodeId,
        now: u64,
    ) -> Result<(), IdentityError> {
        if token.node_id != presenter {
            return Err(IdentityError::SubjectMismatch {
                subject: token.node_id.to_hex(),
                presenter: presenter.to_hex(),
            });
        }
        if token.is_expired(now) {
            return Err(IdentityError::Expired {
                expires: token.expires,
                now,
            });
        }

        Self::check_binding(&token.issuer, &token.issuer_public_key)?;

        let issuer_acceptable = if token.is_genesis {
            token.issuer == token.node_id
                || self.trusted_issuers.contains(&token.issuer)
                || self.admitted.contains(&token.issuer)
        } else {
            self.admitted.contains(&token.issuer)
                || self.trusted_issuers.contains(&token.issuer)
        };
        if !issuer_acceptable {
            return Err(IdentityError::UnknownIssuer(token.issuer.to_hex()));
        }

        let message = membership_signing_bytes(
            &token.node_id,
            &token.issuer,
            token.is_genesis,
            token.issued_at,
            token.expires,
        );
        token
            .issuer_public_key
            .verify(&message, &token.signature)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;

        self.admitted.insert(token.node_id);
        debug!(member = %token.node_id, genesis = token.is_genesis, "Membership verified");
        Ok(())
    }

    /// Verify and redeem an invitation presented by `presenter`.
    ///
    /// The nonce is consumed only on full success, so a failed
    /// presentation does not burn the invitation.
    pub fn verify_invitation(
        &mut self,
        token: &InvitationToken,
        presenter: NodeId,
        now: u64,
    ) -> Result<(), IdentityError> {
        if token.invitee != presenter {
            return Err(IdentityError::SubjectMismatch {
                subject: token.invitee.to_hex(),
                presenter: presenter.to_hex(),
            });
        }
        if token.is_expired(now) {
            return Err(IdentityError::Expired {
                expires: token.expires,
                now,
            });
        }
        if self.nonces.is_redeemed(&token.nonce) {
            return Err(IdentityError::NonceReused);
        }

        Self::check_binding(&token.inviter, &token.inviter_public_key)?;

        if !self.admitted.contains(&token.inviter) && !self.trusted_issuers.contains(&token.inviter)
        {
            return Err(IdentityError::UnknownIssuer(token.inviter.to_hex()));
        }

        let message = invitation_signing_bytes(
            &token.inviter,
            &token.invitee,
            token.issued_at,
            token.expires,
            &token.nonce,
        );
        token
            .inviter_public_key
            .verify(&message, &token.signature)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;

        self.nonces.redeem(&token.nonce, token.expires);
        debug!(invitee = %token.invitee, inviter = %token.inviter, "Invitation redeemed");
        Ok(())
    }

    /// Drop nonce entries for invitations that have expired anyway.
    pub fn gc(&mut self, now: u64) -> usize {
        self.nonces.gc_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeIdentity;
    use crate::invitation::issue_invitation;
    use crate::membership::{issue_genesis_token, issue_membership_token};

    #[test]
    fn self_signed_genesis_verifies() {
        let genesis = NodeIdentity::generate();
        let token = issue_genesis_token(&genesis, 1000);

        let mut verifier = TokenVerifier::new();
        verifier
            .verify_membership(&token, genesis.node_id(), 1500)
            .unwrap();
        assert!(verifier.is_admitted(&genesis.node_id()));
    }

    #[test]
    fn chain_extends_from_genesis_member() {
        let genesis = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let mut verifier = TokenVerifier::new();

        let genesis_token = issue_genesis_token(&genesis, 1000);
        verifier
            .verify_membership(&genesis_token, genesis.node_id(), 1000)
            .unwrap();

        let joiner_token = issue_membership_token(&genesis, joiner.node_id(), 1100);
        verifier
            .verify_membership(&joiner_token, joiner.node_id(), 1200)
            .unwrap();
        assert!(verifier.is_admitted(&joiner.node_id()));
    }

    #[test]
    fn unknown_issuer_is_rejected() {
        let stranger = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let token = issue_membership_token(&stranger, joiner.node_id(), 1000);

        let mut verifier = TokenVerifier::new();
        assert!(matches!(
            verifier.verify_membership(&token, joiner.node_id(), 1100),
            Err(IdentityError::UnknownIssuer(_))
        ));
    }

    #[test]
    fn tampered_token_fails_signature_check() {
        let genesis = NodeIdentity::generate();
        let mut token = issue_genesis_token(&genesis, 1000);
        token.expires += 1;

        let mut verifier = TokenVerifier::new();
        assert!(matches!(
            verifier.verify_membership(&token, genesis.node_id(), 1100),
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[test]
    fn wrong_presenter_is_a_mismatch() {
        let genesis = NodeIdentity::generate();
        let other = NodeIdentity::generate();
        let token = issue_genesis_token(&genesis, 1000);

        let mut verifier = TokenVerifier::new();
        assert!(matches!(
            verifier.verify_membership(&token, other.node_id(), 1100),
            Err(IdentityError::SubjectMismatch { .. })
        ));
    }

    #[test]
    fn expired_membership_is_rejected() {
        let genesis = NodeIdentity::generate();
        let token = issue_genesis_token(&genesis, 1000);

        let mut verifier = TokenVerifier::new();
        assert!(matches!(
            verifier.verify_membership(&token, genesis.node_id(), token.expires + 1),
            Err(IdentityError::Expired { .. })
        ));
    }

    #[test]
    fn invitation_is_single_use() {
        let member = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let mut verifier = TokenVerifier::new();
        verifier.admit(member.node_id());

        let invitation = issue_invitation(&member, joiner.node_id(), 1000);
        verifier
            .verify_invitation(&invitation, joiner.node_id(), 1100)
            .unwrap();
        assert!(matches!(
            verifier.verify_invitation(&invitation, joiner.node_id(), 1100),
            Err(IdentityError::NonceReused)
        ));
    }

    #[test]
    fn failed_presentation_does_not_burn_the_nonce() {
        let member = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let impostor = NodeIdentity::generate();
        let mut verifier = TokenVerifier::new();
        verifier.admit(member.node_id());

        let invitation = issue_invitation(&member, joiner.node_id(), 1000);
        // An impostor presenting the stolen invitation fails on subject.
        assert!(verifier
            .verify_invitation(&invitation, impostor.node_id(), 1100)
            .is_err());
        // The legitimate invitee can still redeem it.
        verifier
            .verify_invitation(&invitation, joiner.node_id(), 1100)
            .unwrap();
    }

    #[test]
    fn coordinator_issued_genesis_needs_trust() {
        let coordinator = NodeIdentity::generate();
        let joiner = NodeIdentity::generate();
        let token =
            crate::membership::issue_genesis_token_for(&coordinator, joiner.node_id(), 1000);

        let mut verifier = TokenVerifier::new();
        assert!(verifier
            .verify_membership(&token, joiner.node_id(), 1100)
            .is_err());

        verifier.trust_issuer(coordinator.node_id());
        verifier
            .verify_membership(&token, joiner.node_id(), 1100)
            .unwrap();
    }
}
