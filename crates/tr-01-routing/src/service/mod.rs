//! Time-aware wrapper around the routing table.
//!
//! This is the single owner the rest of the node mutates through. The
//! DHT core holds it behind its own lock; readers work from cloned
//! snapshots, never references into the table.

use crate::domain::{
    AddOutcome, BanReason, PeerRecord, RoutingConfig, RoutingError, RoutingTable,
    RoutingTableStats,
};
use crate::ports::TimeSource;
use shared_types::{NodeId, Timestamp};

/// Routing service: table plus clock.
pub struct RoutingService {
    table: RoutingTable,
    time_source: Box<dyn TimeSource>,
}

impl RoutingService {
    pub fn new(local_id: NodeId, config: RoutingConfig, time_source: Box<dyn TimeSource>) -> Self {
        Self {
            table: RoutingTable::new(local_id, config),
            time_source,
        }
    }

    fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    pub fn local_id(&self) -> NodeId {
        *self.table.local_id()
    }

    /// Add or refresh a peer record.
    pub fn add_node(&mut self, record: PeerRecord) -> Result<AddOutcome, RoutingError> {
        let now = self.now();
        self.table.add_node(record, now)
    }

    /// Remove a departed peer.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<PeerRecord, RoutingError> {
        self.table.remove_node(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.table.contains(id)
    }

    /// Peer answered or called us: refresh recency and bucket activity.
    pub fn touch(&mut self, id: &NodeId) -> Result<(), RoutingError> {
        let now = self.now();
        self.table.touch(id, now)
    }

    /// Record a successful ping with its round trip.
    pub fn record_ping(&mut self, id: &NodeId, rtt_ms: u64) -> Result<(), RoutingError> {
        let now = self.now();
        self.table.with_peer_mut(id, |p| p.record_ping(rtt_ms, now))?;
        self.table.touch(id, now)
    }

    /// Record an RPC failure against a peer.
    pub fn record_failure(&mut self, id: &NodeId) -> Result<(), RoutingError> {
        self.table.with_peer_mut(id, |p| p.record_failure())
    }

    /// Connection lifecycle: link up.
    pub fn mark_connected(&mut self, id: &NodeId) -> Result<(), RoutingError> {
        let now = self.now();
        self.table.with_peer_mut(id, |p| p.mark_connected(now))
    }

    /// Connection lifecycle: link down.
    pub fn mark_disconnected(&mut self, id: &NodeId) -> Result<(), RoutingError> {
        self.table.with_peer_mut(id, |p| p.mark_disconnected())
    }

    /// Install HELLO metadata on a peer record.
    pub fn install_metadata(
        &mut self,
        id: &NodeId,
        metadata: shared_types::PeerMetadata,
    ) -> Result<(), RoutingError> {
        self.table.with_peer_mut(id, |p| p.install_metadata(metadata))
    }

    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        self.table.find_closest(target, count)
    }

    pub fn find_closest_alive(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        self.table.find_closest_alive(target, count)
    }

    pub fn get(&self, id: &NodeId) -> Option<PeerRecord> {
        self.table.get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.table.snapshot()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn connected_alive(&self) -> usize {
        self.table.connected_alive()
    }

    /// Peers needing a liveness probe.
    pub fn stale_peers(&self, interval_secs: u64) -> Vec<NodeId> {
        self.table.stale_peers(self.now(), interval_secs)
    }

    /// Evict disconnected stale entries.
    pub fn sweep_stale(&mut self) -> Vec<NodeId> {
        let now = self.now();
        self.table.sweep_stale(now)
    }

    /// Buckets idle past `idle_secs`, as refresh indices for target
    /// generation.
    pub fn refresh_indices(&mut self, idle_secs: u64) -> Vec<usize> {
        let now = self.now();
        self.table
            .buckets_needing_refresh(now, idle_secs)
            .into_iter()
            .map(|pos| self.table.refresh_index(pos))
            .collect()
    }

    /// Stamp lookup activity toward a target id.
    pub fn stamp_activity(&mut self, id: &NodeId) {
        let now = self.now();
        self.table.stamp_activity(id, now);
    }

    pub fn ban_peer(&mut self, id: NodeId, duration_secs: u64, reason: BanReason) {
        let now = self.now();
        self.table.ban_peer(id, duration_secs, reason, now);
    }

    pub fn is_banned(&self, id: &NodeId) -> bool {
        self.table.is_banned(id, self.now())
    }

    pub fn gc_bans(&mut self) -> usize {
        let now = self.now();
        self.table.gc_bans(now)
    }

    pub fn stats(&self) -> RoutingTableStats {
        self.table.stats(self.now())
    }

    pub fn validate(&self) -> Result<(), RoutingError> {
        self.table.validate()
    }

    /// Direct access for advanced callers (maintenance loops).
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut RoutingTable {
        &mut self.table
    }
}
