//! Banned peer tracking with expiring entries.

use shared_types::{NodeId, Timestamp};
use std::collections::HashMap;

/// Why a peer was banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanReason {
    /// Peer sent frames that failed to parse repeatedly.
    MalformedFrames,
    /// Peer exceeded its RPC rate limit persistently.
    ExcessiveRequests,
    /// Operator action.
    Manual,
}

#[derive(Debug, Clone)]
struct BanEntry {
    until: Timestamp,
    reason: BanReason,
}

/// Expiring ban list keyed by node id.
#[derive(Debug, Default)]
pub struct BannedPeers {
    entries: HashMap<NodeId, BanEntry>,
}

impl BannedPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban `id` until `until`.
    pub fn ban(&mut self, id: NodeId, until: Timestamp, reason: BanReason) {
        self.entries.insert(id, BanEntry { until, reason });
    }

    /// Whether `id` is banned at `now`.
    pub fn is_banned(&self, id: &NodeId, now: Timestamp) -> bool {
        self.entries.get(id).is_some_and(|e| e.until > now)
    }

    /// The reason for an active ban, if any.
    pub fn reason(&self, id: &NodeId, now: Timestamp) -> Option<BanReason> {
        self.entries
            .get(id)
            .filter(|e| e.until > now)
            .map(|e| e.reason)
    }

    /// Number of active bans at `now`.
    pub fn count(&self, now: Timestamp) -> usize {
        self.entries.values().filter(|e| e.until > now).count()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn gc_expired(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.until > now);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn ban_expires() {
        let mut banned = BannedPeers::new();
        banned.ban(id(1), Timestamp::new(200), BanReason::ExcessiveRequests);

        assert!(banned.is_banned(&id(1), Timestamp::new(150)));
        assert!(!banned.is_banned(&id(1), Timestamp::new(200)));
    }

    #[test]
    fn gc_drops_expired_entries() {
        let mut banned = BannedPeers::new();
        banned.ban(id(1), Timestamp::new(100), BanReason::Manual);
        banned.ban(id(2), Timestamp::new(300), BanReason::MalformedFrames);

        assert_eq!(banned.gc_expired(Timestamp::new(200)), 1);
        assert_eq!(banned.count(Timestamp::new(200)), 1);
    }
}
