//! The routing table: a prefix tree of k-buckets over the local id.
//!
//! The table starts with a single bucket covering the whole identifier
//! space. Only the bucket containing the local id's range may split, and
//! only when full. Bucket `i` in the vector holds peers sharing exactly
//! `i` prefix bits with the local id; the last bucket holds everything
//! deeper.
//!
//! The table is the single owner of peer records. All mutation funnels
//! through it; readers take cloned snapshots.

use super::banned::{BanReason, BannedPeers};
use super::errors::RoutingError;
use super::kbucket::{AddOutcome, KBucket};
use super::peer_record::PeerRecord;
use super::services::bucket_index;
use super::stats::{RoutingTableStats, TableWarning};
use super::value_objects::RoutingConfig;
use shared_types::{NodeId, Timestamp};
use tracing::{debug, trace};

/// Deepest split the table will perform.
const MAX_DEPTH: usize = 159;

/// Kademlia routing table with split-on-demand buckets.
#[derive(Debug)]
pub struct RoutingTable {
    /// Our own identifier (immutable after creation).
    local_id: NodeId,
    /// Buckets ordered by shared-prefix depth; the last covers the
    /// local id's range.
    buckets: Vec<KBucket>,
    /// Banned peers with expiry.
    banned: BannedPeers,
    /// Configuration.
    config: RoutingConfig,
    /// Total peers across buckets, kept in lockstep.
    total: usize,
}

impl RoutingTable {
    pub fn new(local_id: NodeId, config: RoutingConfig) -> Self {
        Self {
            local_id,
            buckets: vec![KBucket::new(0)],
            banned: BannedPeers::new(),
            config,
            total: 0,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Validate a wire identifier into a durable node id.
    ///
    /// Transient `bootstrap_` identifiers and anything that is not a
    /// 40-character hex string are rejected here, at the boundary, so
    /// phantom identifiers never reach a bucket.
    pub fn admit_wire_id(s: &str) -> Result<NodeId, RoutingError> {
        NodeId::from_hex(s).map_err(|e| RoutingError::InvalidWireId(e.to_string()))
    }

    /// Vector position of the bucket covering `id`.
    fn position(&self, id: &NodeId) -> usize {
        let depth = self.local_id.distance(id).leading_zero_bits() as usize;
        depth.min(self.buckets.len() - 1)
    }

    /// Whether the bucket at `pos` may split further.
    fn splittable(&self, pos: usize) -> bool {
        pos == self.buckets.len() - 1 && self.buckets.len() - 1 < MAX_DEPTH
    }

    /// Add or refresh a peer.
    ///
    /// On a full bucket: split and retry while the bucket covers the
    /// local range, otherwise evict the head only if it is stale or
    /// dead. A full bucket of healthy residents silently drops the
    /// newcomer (`RejectedFull`) — resident peers keep their slots.
    pub fn add_node(&mut self, record: PeerRecord, now: Timestamp) -> Result<AddOutcome, RoutingError> {
        if record.id == self.local_id {
            return Err(RoutingError::SelfEntry);
        }
        if self.banned.is_banned(&record.id, now) {
            return Err(RoutingError::PeerBanned);
        }

        loop {
            let pos = self.position(&record.id);
            let k = self.config.k;
            match self.buckets[pos].add(record.clone(), k, now) {
                AddOutcome::Added => {
                    self.total += 1;
                    trace!(peer = %record.id, bucket = pos, "Peer added to routing table");
                    return Ok(AddOutcome::Added);
                }
                AddOutcome::Updated => return Ok(AddOutcome::Updated),
                AddOutcome::RejectedFull => {
                    if self.splittable(pos) {
                        let deeper = self.buckets[pos].split(&self.local_id);
                        self.buckets.push(deeper);
                        debug!(depth = self.buckets.len() - 1, "Routing bucket split");
                        continue;
                    }

                    // Classical replacement: the head goes only if it is
                    // stale or dead.
                    let evict = self.buckets[pos].least_recently_seen().map(|head| {
                        (head.id, head.is_stale(now, self.config.stale_after_secs) || !head.alive())
                    });
                    match evict {
                        Some((head_id, true)) => {
                            self.buckets[pos].remove(&head_id);
                            self.total -= 1;
                            let outcome = self.buckets[pos].add(record.clone(), k, now);
                            debug_assert_eq!(outcome, AddOutcome::Added);
                            self.total += 1;
                            debug!(evicted = %head_id, added = %record.id, "Stale head evicted");
                            return Ok(AddOutcome::Added);
                        }
                        _ => return Ok(AddOutcome::RejectedFull),
                    }
                }
            }
        }
    }

    /// Remove a peer.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<PeerRecord, RoutingError> {
        let pos = self.position(id);
        match self.buckets[pos].remove(id) {
            Some(record) => {
                self.total -= 1;
                Ok(record)
            }
            None => Err(RoutingError::PeerNotFound),
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        *id != self.local_id && self.buckets[self.position(id)].contains(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        if *id == self.local_id {
            return None;
        }
        self.buckets[self.position(id)].get(id)
    }

    /// Run a mutation against one peer record.
    pub fn with_peer_mut<T>(
        &mut self,
        id: &NodeId,
        f: impl FnOnce(&mut PeerRecord) -> T,
    ) -> Result<T, RoutingError> {
        let pos = self.position(id);
        self.buckets[pos]
            .get_mut(id)
            .map(f)
            .ok_or(RoutingError::PeerNotFound)
    }

    /// Refresh a peer's recency (it answered or called us) and stamp
    /// bucket activity.
    pub fn touch(&mut self, id: &NodeId, now: Timestamp) -> Result<(), RoutingError> {
        let pos = self.position(id);
        self.buckets[pos].touch_activity(now);
        if self.buckets[pos].move_to_tail(id, now) {
            Ok(())
        } else {
            Err(RoutingError::PeerNotFound)
        }
    }

    /// Stamp activity in the bucket covering `id` without requiring the
    /// peer to be present (lookups toward arbitrary targets).
    pub fn stamp_activity(&mut self, id: &NodeId, now: Timestamp) {
        let pos = self.position(id);
        self.buckets[pos].touch_activity(now);
    }

    /// The `count` known peers closest to `target` by XOR distance.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        let mut peers: Vec<PeerRecord> = self
            .buckets
            .iter()
            .flat_map(|b| b.peers().iter().cloned())
            .collect();
        peers.sort_by_key(|p| p.id.distance(target));
        peers.truncate(count);
        peers
    }

    /// Closest peers filtered to live, connected entries.
    pub fn find_closest_alive(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        let mut peers: Vec<PeerRecord> = self
            .buckets
            .iter()
            .flat_map(|b| b.peers().iter())
            .filter(|p| p.connected && p.alive())
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.id.distance(target));
        peers.truncate(count);
        peers
    }

    /// Peers that have not been heard from within `interval_secs` and
    /// need a liveness probe.
    pub fn stale_peers(&self, now: Timestamp, interval_secs: u64) -> Vec<NodeId> {
        self.buckets
            .iter()
            .flat_map(|b| b.peers().iter())
            .filter(|p| now.since(p.last_seen) >= interval_secs)
            .map(|p| p.id)
            .collect()
    }

    /// Drop disconnected entries idle past the staleness threshold.
    pub fn sweep_stale(&mut self, now: Timestamp) -> Vec<NodeId> {
        let threshold = self.config.stale_after_secs;
        let mut removed = Vec::new();
        for bucket in &mut self.buckets {
            removed.extend(bucket.sweep_stale(now, threshold));
        }
        self.total -= removed.len();
        removed
    }

    /// The least-recently-updated non-empty bucket, for opportunistic
    /// refresh.
    pub fn bucket_for_refresh(&self) -> Option<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .min_by_key(|(_, b)| b.last_updated())
            .map(|(pos, _)| pos)
    }

    /// Buckets with no activity within `idle_secs`.
    pub fn buckets_needing_refresh(&self, now: Timestamp, idle_secs: u64) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| now.since(b.last_activity()) >= idle_secs)
            .map(|(pos, _)| pos)
            .collect()
    }

    /// Bucket index (`159 - depth`) for the bucket at vector position
    /// `pos`, used to aim refresh targets.
    pub fn refresh_index(&self, pos: usize) -> usize {
        159 - self.buckets[pos].depth().min(159)
    }

    /// Number of connected, live peers.
    pub fn connected_alive(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|b| b.peers().iter())
            .filter(|p| p.connected && p.alive())
            .count()
    }

    /// Clone every record (snapshot for readers).
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.buckets
            .iter()
            .flat_map(|b| b.peers().iter().cloned())
            .collect()
    }

    /// Ban a peer, removing any table entry.
    pub fn ban_peer(&mut self, id: NodeId, duration_secs: u64, reason: BanReason, now: Timestamp) {
        let _ = self.remove_node(&id);
        self.banned.ban(id, now.add_secs(duration_secs), reason);
    }

    pub fn is_banned(&self, id: &NodeId, now: Timestamp) -> bool {
        self.banned.is_banned(id, now)
    }

    /// Drop expired bans.
    pub fn gc_bans(&mut self, now: Timestamp) -> usize {
        self.banned.gc_expired(now)
    }

    /// Consistency check, run on request (never in the hot path).
    ///
    /// Verifies the peer count, duplicate-freedom, the local-id
    /// exclusion, and strictly increasing bucket depths.
    pub fn validate(&self) -> Result<(), RoutingError> {
        let counted: usize = self.buckets.iter().map(|b| b.len()).sum();
        if counted != self.total {
            return Err(RoutingError::Inconsistent(format!(
                "bucket sizes sum to {counted}, table says {}",
                self.total
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for bucket in &self.buckets {
            for peer in bucket.peers() {
                if peer.id == self.local_id {
                    return Err(RoutingError::Inconsistent("local id present".into()));
                }
                if !seen.insert(peer.id) {
                    return Err(RoutingError::Inconsistent(format!(
                        "duplicate id {}",
                        peer.id
                    )));
                }
            }
        }

        let mut last_depth = None;
        for bucket in &self.buckets {
            if let Some(prev) = last_depth {
                if bucket.depth() <= prev {
                    return Err(RoutingError::Inconsistent(
                        "bucket depths not strictly increasing".into(),
                    ));
                }
            }
            last_depth = Some(bucket.depth());
        }

        Ok(())
    }

    /// Health snapshot.
    pub fn stats(&self, now: Timestamp) -> RoutingTableStats {
        let connected = self.connected_alive();
        let oldest_peer_age_secs = self
            .buckets
            .iter()
            .flat_map(|b| b.peers().iter())
            .map(|p| now.since(p.last_seen))
            .max()
            .unwrap_or(0);

        let mut warnings = Vec::new();
        if self.total < self.config.k / 2 {
            warnings.push(TableWarning::TooFewPeers);
        }
        if connected == 0 {
            warnings.push(TableWarning::Isolated);
        } else {
            let freshest = self
                .buckets
                .iter()
                .flat_map(|b| b.peers().iter())
                .map(|p| now.since(p.last_seen))
                .min()
                .unwrap_or(u64::MAX);
            if freshest > 2 * self.config.stale_after_secs {
                warnings.push(TableWarning::NoRecentActivity);
            }
        }

        RoutingTableStats {
            total_peers: self.total,
            connected_peers: connected,
            buckets_used: self.buckets.iter().filter(|b| !b.is_empty()).count(),
            bucket_count: self.buckets.len(),
            banned_count: self.banned.count(now),
            oldest_peer_age_secs,
            warnings,
        }
    }

    /// Bucket index of a peer id relative to the local id.
    pub fn bucket_index_of(&self, id: &NodeId) -> Option<usize> {
        bucket_index(&self.local_id, id)
    }
}
