//! Time-bounded nonce ledger for single-use grants.
//!
//! A redeemed nonce must never be accepted again within its validity
//! window, and the ledger must stay bounded: entries are garbage
//! collected once the token they guarded has expired anyway.

use std::collections::HashMap;

/// Single-use nonce tracking with expiry-based garbage collection.
#[derive(Debug, Default)]
pub struct NonceLedger {
    /// nonce -> expiry of the guarded token (unix seconds).
    redeemed: HashMap<String, u64>,
}

impl NonceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redeem a nonce. Returns `false` if it was already used.
    ///
    /// `expires` is the guarded token's expiry; after that point the
    /// token itself is dead and the ledger entry can go.
    pub fn redeem(&mut self, nonce: &str, expires: u64) -> bool {
        if self.redeemed.contains_key(nonce) {
            return false;
        }
        self.redeemed.insert(nonce.to_string(), expires);
        true
    }

    /// Whether a nonce has been redeemed.
    pub fn is_redeemed(&self, nonce: &str) -> bool {
        self.redeemed.contains_key(nonce)
    }

    /// Drop entries whose guarded token has expired. Returns the count
    /// removed.
    pub fn gc_expired(&mut self, now: u64) -> usize {
        let before = self.redeemed.len();
        self.redeemed.retain(|_, expires| *expires > now);
        before - self.redeemed.len()
    }

    pub fn len(&self) -> usize {
        self.redeemed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redeemed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_redeem_fails() {
        let mut ledger = NonceLedger::new();
        assert!(ledger.redeem("n1", 1000));
        assert!(!ledger.redeem("n1", 1000));
    }

    #[test]
    fn gc_drops_expired_entries() {
        let mut ledger = NonceLedger::new();
        ledger.redeem("old", 100);
        ledger.redeem("fresh", 1000);

        assert_eq!(ledger.gc_expired(500), 1);
        assert!(!ledger.is_redeemed("old"));
        assert!(ledger.is_redeemed("fresh"));
    }
}
