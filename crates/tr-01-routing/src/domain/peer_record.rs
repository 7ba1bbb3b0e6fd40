//! Per-peer state tracked by the routing table.

use shared_types::{NodeId, PeerDescriptor, PeerMetadata, Timestamp};

/// Failures before a peer counts as dead.
const DEFAULT_FAILURE_CAP: u32 = 3;

/// State of one known peer.
///
/// The record never holds a connection handle; the transport owns those.
/// `connected` is a snapshot flag maintained from lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    /// Durable identifier (immutable).
    pub id: NodeId,

    /// Opaque transport locator, when known.
    pub endpoint: Option<String>,

    /// Whether an active link exists right now.
    pub connected: bool,

    /// Last time anything was heard from this peer.
    pub last_seen: Timestamp,

    /// Last successful ping.
    pub last_ping: Option<Timestamp>,

    /// Smoothed round-trip estimate, milliseconds.
    pub rtt_ms: Option<u64>,

    /// Consecutive failures since the last success.
    pub failure_count: u32,

    /// Announced metadata (node type, bridge flag, visibility, ...).
    pub metadata: PeerMetadata,
}

impl PeerRecord {
    /// Create a record for a newly learned peer.
    pub fn new(id: NodeId, now: Timestamp) -> Self {
        Self {
            id,
            endpoint: None,
            connected: false,
            last_seen: now,
            last_ping: None,
            rtt_ms: None,
            failure_count: 0,
            metadata: PeerMetadata::default(),
        }
    }

    /// Create a record from a wire descriptor.
    pub fn from_descriptor(descriptor: &PeerDescriptor, now: Timestamp) -> Self {
        let mut record = Self::new(descriptor.id, now);
        record.endpoint = descriptor
            .addr
            .clone()
            .or_else(|| descriptor.metadata.listening_address.clone());
        record.metadata = descriptor.metadata.clone();
        record
    }

    /// Whether the peer is considered alive (below the failure cap).
    pub fn alive(&self) -> bool {
        self.failure_count < DEFAULT_FAILURE_CAP
    }

    /// A successful ping: advances liveness and the RTT estimate.
    pub fn record_ping(&mut self, rtt_ms: u64, now: Timestamp) {
        self.last_ping = Some(now);
        self.last_seen = now;
        self.failure_count = 0;
        // Simple smoothing: 7/8 old + 1/8 new, matching a TCP-style SRTT.
        self.rtt_ms = Some(match self.rtt_ms {
            Some(old) => (old * 7 + rtt_ms) / 8,
            None => rtt_ms,
        });
    }

    /// Any inbound traffic counts as a sighting.
    pub fn record_seen(&mut self, now: Timestamp) {
        self.last_seen = now;
        self.failure_count = 0;
    }

    /// A failed RPC or dropped frame.
    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
    }

    /// An active link came up.
    pub fn mark_connected(&mut self, now: Timestamp) {
        self.connected = true;
        self.record_seen(now);
    }

    /// The link went away.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Install announced metadata (from a HELLO or a descriptor).
    pub fn install_metadata(&mut self, metadata: PeerMetadata) {
        if metadata.listening_address.is_some() && self.endpoint.is_none() {
            self.endpoint = metadata.listening_address.clone();
        }
        self.metadata = metadata;
    }

    /// Whether this entry is stale at `now`.
    pub fn is_stale(&self, now: Timestamp, stale_after_secs: u64) -> bool {
        now.since(self.last_seen) > stale_after_secs
    }

    /// Usefulness heuristic; higher is better.
    ///
    /// `100 - 10*failures - min(rtt/10, 50) - min(age_minutes, 30)
    ///  - 50 if dead + 20 if connected`
    pub fn quality_score(&self, now: Timestamp) -> i64 {
        let mut score: i64 = 100;
        score -= 10 * i64::from(self.failure_count);
        if let Some(rtt) = self.rtt_ms {
            score -= (rtt as i64 / 10).min(50);
        }
        let age_minutes = (now.since(self.last_seen) / 60) as i64;
        score -= age_minutes.min(30);
        if !self.alive() {
            score -= 50;
        }
        if self.connected {
            score += 20;
        }
        score
    }

    /// Wire descriptor snapshot of this record.
    pub fn to_descriptor(&self) -> PeerDescriptor {
        PeerDescriptor {
            id: self.id,
            addr: self.endpoint.clone(),
            last_seen: Some(self.last_seen.as_secs()),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(b: u8) -> PeerRecord {
        PeerRecord::new(NodeId::from_bytes([b; 20]), Timestamp::new(1000))
    }

    #[test]
    fn three_failures_kill_the_peer() {
        let mut peer = record(1);
        assert!(peer.alive());
        peer.record_failure();
        peer.record_failure();
        assert!(peer.alive());
        peer.record_failure();
        assert!(!peer.alive());
    }

    #[test]
    fn ping_resets_failures_and_smooths_rtt() {
        let mut peer = record(1);
        peer.record_failure();
        peer.record_ping(80, Timestamp::new(1010));

        assert_eq!(peer.failure_count, 0);
        assert_eq!(peer.rtt_ms, Some(80));
        assert_eq!(peer.last_ping, Some(Timestamp::new(1010)));

        peer.record_ping(160, Timestamp::new(1020));
        assert_eq!(peer.rtt_ms, Some((80 * 7 + 160) / 8));
    }

    #[test]
    fn quality_score_rewards_connected_fresh_peers() {
        let now = Timestamp::new(1000);
        let mut connected = record(1);
        connected.mark_connected(now);

        let mut dead = record(2);
        dead.record_failure();
        dead.record_failure();
        dead.record_failure();

        assert!(connected.quality_score(now) > dead.quality_score(now));
        assert_eq!(connected.quality_score(now), 120);
        // 100 - 30 (failures) - 50 (dead) = 20
        assert_eq!(dead.quality_score(now), 20);
    }

    #[test]
    fn quality_score_caps_rtt_and_age_penalties() {
        let mut peer = record(3);
        peer.record_ping(10_000, Timestamp::new(1000));
        // RTT penalty caps at 50, so 100 - 50 = 50.
        assert_eq!(peer.quality_score(Timestamp::new(1000)), 50);
        // A day later the age penalty caps at 30.
        assert_eq!(peer.quality_score(Timestamp::new(1000 + 86_400)), 20);
    }

    #[test]
    fn staleness_uses_last_seen() {
        let peer = record(4);
        assert!(!peer.is_stale(Timestamp::new(1000 + 899), 900));
        assert!(peer.is_stale(Timestamp::new(1000 + 901), 900));
    }

    #[test]
    fn install_metadata_keeps_existing_endpoint() {
        let mut peer = record(5);
        peer.endpoint = Some("203.0.113.9:9470".into());
        peer.install_metadata(PeerMetadata::server("198.51.100.1:9470"));
        assert_eq!(peer.endpoint.as_deref(), Some("203.0.113.9:9470"));
    }
}
