//! Routing table behavior tests.

use super::*;
use shared_types::{NodeId, Timestamp};

const NOW: Timestamp = Timestamp(1_000_000);

fn id(bytes: [u8; 20]) -> NodeId {
    NodeId::from_bytes(bytes)
}

/// An id sharing exactly `depth` leading bits with `local` (all-zero
/// local assumed), distinguished by `suffix`.
fn id_at_depth(depth: usize, suffix: u8) -> NodeId {
    let mut bytes = [0u8; 20];
    let byte = depth / 8;
    let bit = depth % 8;
    bytes[byte] = 0x80u8 >> bit;
    bytes[19] |= suffix & 0x0f;
    NodeId::from_bytes(bytes)
}

fn table_with_k(k: usize) -> RoutingTable {
    let config = RoutingConfig {
        k,
        ..RoutingConfig::for_testing()
    };
    RoutingTable::new(id([0u8; 20]), config)
}

fn record(node: NodeId) -> PeerRecord {
    PeerRecord::new(node, NOW)
}

#[test]
fn rejects_local_id() {
    let mut table = table_with_k(3);
    let local = *table.local_id();
    assert_eq!(table.add_node(record(local), NOW), Err(RoutingError::SelfEntry));
    assert!(!table.contains(&local));
}

#[test]
fn rejects_transient_wire_ids() {
    assert!(RoutingTable::admit_wire_id("bootstrap_7fa2").is_err());
    assert!(RoutingTable::admit_wire_id("not-hex").is_err());
    assert!(RoutingTable::admit_wire_id(&"ab".repeat(20)).is_ok());
}

#[test]
fn add_and_lookup_round_trip() {
    let mut table = table_with_k(3);
    let peer = id([9u8; 20]);
    assert_eq!(table.add_node(record(peer), NOW), Ok(AddOutcome::Added));
    assert!(table.contains(&peer));
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(&peer).unwrap().id, peer);
}

#[test]
fn full_local_bucket_splits_and_accepts_k_plus_one() {
    // Peers at distinct depths all land in the local-range bucket at
    // first; once it fills, splitting separates them instead of
    // rejecting the newcomer.
    let mut table = table_with_k(2);
    for depth in [4usize, 5, 6] {
        let peer = id_at_depth(depth, 1);
        assert_eq!(table.add_node(record(peer), NOW), Ok(AddOutcome::Added), "depth {depth}");
    }
    assert!(table.bucket_count() > 1);
    assert_eq!(table.len(), 3);
    table.validate().unwrap();
}

#[test]
fn full_far_bucket_drops_newcomer_when_residents_are_healthy() {
    let mut table = table_with_k(2);
    // Fill depth-0 (far) bucket: ids with the first bit set.
    let mut residents = Vec::new();
    for suffix in 1..=2u8 {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x80;
        bytes[19] = suffix;
        residents.push(id(bytes));
        table.add_node(record(*residents.last().unwrap()), NOW).unwrap();
    }
    // Force the table deep enough that depth-0 is no longer the last
    // bucket, then try one more far peer.
    table.add_node(record(id_at_depth(3, 1)), NOW).unwrap();
    for suffix in 1..=2u8 {
        table.add_node(record(id_at_depth(1, suffix)), NOW).unwrap();
    }

    let mut bytes = [0u8; 20];
    bytes[0] = 0x80;
    bytes[19] = 9;
    let newcomer = id(bytes);
    assert_eq!(table.add_node(record(newcomer), NOW), Ok(AddOutcome::RejectedFull));
    assert!(!table.contains(&newcomer));
    for resident in residents {
        assert!(table.contains(&resident));
    }
    table.validate().unwrap();
}

#[test]
fn stale_head_is_evicted_for_newcomer() {
    let mut table = table_with_k(2);
    // Two far peers plus depth to make the far bucket unsplittable.
    let mut head_bytes = [0u8; 20];
    head_bytes[0] = 0x80;
    head_bytes[19] = 1;
    let head = id(head_bytes);
    table.add_node(record(head), NOW).unwrap();

    let mut second = head_bytes;
    second[19] = 2;
    table.add_node(record(id(second)), NOW).unwrap();
    table.add_node(record(id_at_depth(2, 1)), NOW).unwrap();

    // Age everything past the stale threshold, then freshen the second
    // resident so only the head is stale.
    let later = NOW.add_secs(table.config().stale_after_secs + 10);
    table.touch(&id(second), later).unwrap();

    let mut newcomer_bytes = head_bytes;
    newcomer_bytes[19] = 7;
    let newcomer = id(newcomer_bytes);
    assert_eq!(table.add_node(record(newcomer), later), Ok(AddOutcome::Added));
    assert!(!table.contains(&head));
    assert!(table.contains(&newcomer));
}

#[test]
fn re_add_is_update_not_duplicate() {
    let mut table = table_with_k(3);
    let peer = id([5u8; 20]);
    table.add_node(record(peer), NOW).unwrap();
    assert_eq!(table.add_node(record(peer), NOW.add_secs(5)), Ok(AddOutcome::Updated));
    assert_eq!(table.len(), 1);
    table.validate().unwrap();
}

#[test]
fn find_closest_orders_by_xor() {
    let mut table = table_with_k(4);
    let near = id_at_depth(8, 1);
    let mid = id_at_depth(4, 1);
    let far = id_at_depth(0, 1);
    for peer in [far, near, mid] {
        table.add_node(record(peer), NOW).unwrap();
    }

    let target = *table.local_id();
    let closest: Vec<NodeId> = table
        .find_closest(&target, 3)
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(closest, vec![near, mid, far]);
}

#[test]
fn find_closest_alive_filters_disconnected() {
    let mut table = table_with_k(4);
    let up = id_at_depth(1, 1);
    let down = id_at_depth(2, 1);
    table.add_node(record(up), NOW).unwrap();
    table.add_node(record(down), NOW).unwrap();
    table.with_peer_mut(&up, |p| p.mark_connected(NOW)).unwrap();

    let alive = table.find_closest_alive(table.local_id(), 4);
    assert_eq!(alive.len(), 1);
    assert_eq!(alive[0].id, up);
}

#[test]
fn banned_peer_cannot_re_enter() {
    let mut table = table_with_k(3);
    let peer = id([6u8; 20]);
    table.add_node(record(peer), NOW).unwrap();
    table.ban_peer(peer, 600, BanReason::ExcessiveRequests, NOW);

    assert!(!table.contains(&peer));
    assert_eq!(table.add_node(record(peer), NOW), Err(RoutingError::PeerBanned));
    // After expiry the peer may return.
    let later = NOW.add_secs(601);
    table.gc_bans(later);
    assert_eq!(table.add_node(record(peer), later), Ok(AddOutcome::Added));
}

#[test]
fn sweep_removes_stale_disconnected_peers() {
    let mut table = table_with_k(3);
    let fresh = id_at_depth(1, 1);
    let stale = id_at_depth(2, 1);
    table.add_node(record(fresh), NOW).unwrap();
    table.add_node(record(stale), NOW).unwrap();

    let later = NOW.add_secs(table.config().stale_after_secs + 1);
    table.touch(&fresh, later).unwrap();
    let removed = table.sweep_stale(later);

    assert_eq!(removed, vec![stale]);
    assert_eq!(table.len(), 1);
    table.validate().unwrap();
}

#[test]
fn stats_flag_isolation_and_scarcity() {
    let mut table = table_with_k(20);
    table.add_node(record(id([1u8; 20])), NOW).unwrap();
    let stats = table.stats(NOW);
    assert!(stats.warnings.contains(&TableWarning::TooFewPeers));
    assert!(stats.warnings.contains(&TableWarning::Isolated));
    assert_eq!(stats.total_peers, 1);
}

#[test]
fn refresh_picks_least_recently_updated_bucket() {
    let mut table = table_with_k(2);
    table.add_node(record(id_at_depth(0, 1)), NOW).unwrap();
    table.add_node(record(id_at_depth(4, 1)), NOW).unwrap();
    table.add_node(record(id_at_depth(4, 2)), NOW).unwrap();
    table.add_node(record(id_at_depth(5, 1)), NOW).unwrap();

    // Touch everything deep; the far bucket stays least recent.
    let later = NOW.add_secs(60);
    table.touch(&id_at_depth(4, 1), later).unwrap();
    table.touch(&id_at_depth(5, 1), later).unwrap();

    let pos = table.bucket_for_refresh().unwrap();
    assert_eq!(pos, 0);
    // Its refresh index aims lookups at the far half of the space.
    assert_eq!(table.refresh_index(pos), 159);
}

#[test]
fn snapshot_is_a_copy() {
    let mut table = table_with_k(3);
    let peer = id([2u8; 20]);
    table.add_node(record(peer), NOW).unwrap();

    let mut snapshot = table.snapshot();
    snapshot[0].record_failure();
    assert_eq!(table.get(&peer).unwrap().failure_count, 0);
}
