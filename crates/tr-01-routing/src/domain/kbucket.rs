//! K-bucket: bounded, least-recently-seen-ordered peer container.

use super::peer_record::PeerRecord;
use shared_types::{NodeId, Timestamp};

/// Result of attempting to add a peer to a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New entry appended at the tail.
    Added,
    /// Entry already present; refreshed and moved to the tail.
    Updated,
    /// Bucket full; the newcomer was not admitted.
    RejectedFull,
}

/// A bucket of up to `k` peers within one distance range.
///
/// Head is the least-recently-seen entry, tail the most recent. Resident
/// peers are never displaced by newcomers while they respond; a full
/// bucket rejects the newcomer and the table decides whether the head
/// has gone stale enough to evict. Sequentially connecting with fresh
/// identities therefore cannot flush honest, stable peers.
#[derive(Debug, Clone)]
pub struct KBucket {
    entries: Vec<PeerRecord>,
    /// Shared-prefix depth this bucket covers.
    depth: usize,
    /// Last structural or liveness change.
    last_updated: Timestamp,
    /// Last time a lookup or RPC touched this bucket's range.
    last_activity: Timestamp,
}

impl KBucket {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            depth,
            last_updated: Timestamp::new(0),
            last_activity: Timestamp::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self, k: usize) -> bool {
        self.entries.len() >= k
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    pub fn last_activity(&self) -> Timestamp {
        self.last_activity
    }

    /// Stamp lookup/RPC activity in this bucket's range.
    pub fn touch_activity(&mut self, now: Timestamp) {
        self.last_activity = now;
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.iter().any(|p| &p.id == id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        self.entries.iter().find(|p| &p.id == id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut PeerRecord> {
        self.entries.iter_mut().find(|p| &p.id == id)
    }

    /// The least-recently-seen entry (eviction candidate).
    pub fn least_recently_seen(&self) -> Option<&PeerRecord> {
        self.entries.first()
    }

    pub fn peers(&self) -> &[PeerRecord] {
        &self.entries
    }

    /// Add or refresh a peer.
    ///
    /// Re-adding an existing peer preserves its identity, merges the
    /// newer endpoint/metadata, and moves it to the tail.
    pub fn add(&mut self, record: PeerRecord, k: usize, now: Timestamp) -> AddOutcome {
        if let Some(pos) = self.entries.iter().position(|p| p.id == record.id) {
            let mut existing = self.entries.remove(pos);
            existing.record_seen(now);
            if existing.endpoint.is_none() {
                existing.endpoint = record.endpoint;
            }
            if record.metadata != Default::default() {
                existing.install_metadata(record.metadata);
            }
            existing.connected |= record.connected;
            self.entries.push(existing);
            self.last_updated = now;
            return AddOutcome::Updated;
        }

        if self.entries.len() >= k {
            return AddOutcome::RejectedFull;
        }

        self.entries.push(record);
        self.last_updated = now;
        AddOutcome::Added
    }

    /// Remove a peer by id.
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRecord> {
        self.entries
            .iter()
            .position(|p| &p.id == id)
            .map(|pos| self.entries.remove(pos))
    }

    /// Move an existing peer to the tail, refreshing `last_seen`.
    pub fn move_to_tail(&mut self, id: &NodeId, now: Timestamp) -> bool {
        if let Some(pos) = self.entries.iter().position(|p| &p.id == id) {
            let mut peer = self.entries.remove(pos);
            peer.record_seen(now);
            self.entries.push(peer);
            self.last_updated = now;
            true
        } else {
            false
        }
    }

    /// Split into this bucket (entries at exactly `depth`) and a deeper
    /// bucket (entries sharing more than `depth` prefix bits with
    /// `local`). Returns the deeper bucket.
    pub fn split(&mut self, local: &NodeId) -> KBucket {
        let mut deeper = KBucket::new(self.depth + 1);
        deeper.last_updated = self.last_updated;
        deeper.last_activity = self.last_activity;

        let (stay, go): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|p| local.distance(&p.id).leading_zero_bits() as usize == self.depth);
        self.entries = stay;
        deeper.entries = go;
        deeper
    }

    /// Remove entries idle longer than the threshold. Returns the
    /// removed identifiers.
    pub fn sweep_stale(&mut self, now: Timestamp, stale_after_secs: u64) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.entries.retain(|p| {
            if !p.connected && p.is_stale(now, stale_after_secs) {
                removed.push(p.id);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.last_updated = now;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(bytes: [u8; 20]) -> NodeId {
        NodeId::from_bytes(bytes)
    }

    fn record(b: u8, now: u64) -> PeerRecord {
        PeerRecord::new(id([b; 20]), Timestamp::new(now))
    }

    #[test]
    fn add_until_full_then_reject() {
        let mut bucket = KBucket::new(0);
        let now = Timestamp::new(100);
        assert_eq!(bucket.add(record(1, 100), 2, now), AddOutcome::Added);
        assert_eq!(bucket.add(record(2, 100), 2, now), AddOutcome::Added);
        assert_eq!(bucket.add(record(3, 100), 2, now), AddOutcome::RejectedFull);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn re_add_moves_to_tail_and_preserves_identity() {
        let mut bucket = KBucket::new(0);
        let now = Timestamp::new(100);
        bucket.add(record(1, 100), 3, now);
        bucket.add(record(2, 100), 3, now);

        let outcome = bucket.add(record(1, 100), 3, Timestamp::new(200));
        assert_eq!(outcome, AddOutcome::Updated);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.least_recently_seen().unwrap().id, id([2u8; 20]));
        assert_eq!(bucket.peers().last().unwrap().id, id([1u8; 20]));
        assert_eq!(bucket.peers().last().unwrap().last_seen, Timestamp::new(200));
    }

    #[test]
    fn head_is_least_recently_seen() {
        let mut bucket = KBucket::new(0);
        bucket.add(record(1, 100), 3, Timestamp::new(100));
        bucket.add(record(2, 100), 3, Timestamp::new(100));
        bucket.move_to_tail(&id([1u8; 20]), Timestamp::new(300));
        assert_eq!(bucket.least_recently_seen().unwrap().id, id([2u8; 20]));
    }

    #[test]
    fn split_partitions_on_prefix_depth() {
        // Local is all zeros; ids starting 0x80.. differ in the first
        // bit (depth 0), ids starting 0x40.. share exactly one bit.
        let local = id([0u8; 20]);
        let mut bucket = KBucket::new(0);
        let now = Timestamp::new(100);

        let mut far = [0u8; 20];
        far[0] = 0x80;
        let mut near = [0u8; 20];
        near[0] = 0x40;
        bucket.add(PeerRecord::new(id(far), now), 4, now);
        bucket.add(PeerRecord::new(id(near), now), 4, now);

        let deeper = bucket.split(&local);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.peers()[0].id, id(far));
        assert_eq!(deeper.depth(), 1);
        assert_eq!(deeper.len(), 1);
        assert_eq!(deeper.peers()[0].id, id(near));
    }

    #[test]
    fn sweep_removes_only_stale_disconnected_entries() {
        let mut bucket = KBucket::new(0);
        let start = Timestamp::new(100);
        bucket.add(record(1, 100), 4, start);
        bucket.add(record(2, 100), 4, start);
        bucket.get_mut(&id([2u8; 20])).unwrap().mark_connected(start);

        let removed = bucket.sweep_stale(Timestamp::new(100 + 1000), 900);
        assert_eq!(removed, vec![id([1u8; 20])]);
        assert_eq!(bucket.len(), 1);
    }
}
