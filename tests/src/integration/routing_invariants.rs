//! Routing invariants over generated populations.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared_types::entities::NODE_ID_LEN;
use shared_types::{NodeId, Timestamp};
use tr_01_routing::{bucket_index, AddOutcome, PeerRecord, RoutingConfig, RoutingTable};

fn random_id(rng: &mut StdRng) -> NodeId {
    let mut bytes = [0u8; NODE_ID_LEN];
    rng.fill(&mut bytes);
    NodeId::from_bytes(bytes)
}

#[test]
fn identifier_round_trips_hold_for_random_ids() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let id = random_id(&mut rng);
        assert_eq!(NodeId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(NodeId::from_bytes(id.to_bytes()), id);
        assert!(id.distance(&id).is_zero());
    }
}

#[test]
fn xor_metric_triangle_inequality_over_random_triples() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..500 {
        let (a, b, c) = (random_id(&mut rng), random_id(&mut rng), random_id(&mut rng));
        let ab = a.distance(&b).0;
        let bc = b.distance(&c).0;
        let ac = a.distance(&c).0;
        // XOR distance composes exactly: d(a,c) = d(a,b) ^ d(b,c),
        // which is byte-wise <= the sum.
        for i in 0..NODE_ID_LEN {
            assert_eq!(ac[i], ab[i] ^ bc[i]);
        }
    }
}

#[test]
fn bucket_index_stays_in_range_for_random_pairs() {
    let mut rng = StdRng::seed_from_u64(13);
    let local = random_id(&mut rng);
    for _ in 0..1000 {
        let other = random_id(&mut rng);
        if other == local {
            continue;
        }
        let index = bucket_index(&local, &other).expect("distinct ids have a bucket");
        assert!(index <= 159);
    }
}

#[test]
fn table_stays_consistent_under_random_churn() {
    let mut rng = StdRng::seed_from_u64(99);
    let local = random_id(&mut rng);
    let mut table = RoutingTable::new(local, RoutingConfig::default());
    let now = Timestamp::new(1_000_000);

    let mut inserted = Vec::new();
    for _ in 0..400 {
        let id = random_id(&mut rng);
        if id == local {
            continue;
        }
        match table.add_node(PeerRecord::new(id, now), now) {
            Ok(AddOutcome::Added) => inserted.push(id),
            Ok(_) => {}
            Err(e) => panic!("unexpected add error: {e}"),
        }
        // Interleave removals.
        if rng.gen_bool(0.2) {
            if let Some(victim) = inserted.pop() {
                let _ = table.remove_node(&victim);
            }
        }
    }

    table.validate().expect("table consistent after churn");
    assert!(!table.contains(&local));

    // No duplicates: snapshot ids are unique.
    let snapshot = table.snapshot();
    let mut ids: Vec<_> = snapshot.iter().map(|p| p.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), snapshot.len());
}

#[test]
fn closest_n_agrees_with_exhaustive_sort() {
    let mut rng = StdRng::seed_from_u64(4);
    let local = random_id(&mut rng);
    let mut table = RoutingTable::new(local, RoutingConfig::default());
    let now = Timestamp::new(1_000_000);

    let mut population = Vec::new();
    for _ in 0..200 {
        let id = random_id(&mut rng);
        if id != local && table.add_node(PeerRecord::new(id, now), now) == Ok(AddOutcome::Added) {
            population.push(id);
        }
    }

    let target = random_id(&mut rng);
    let from_table: Vec<NodeId> = table
        .find_closest(&target, 20)
        .into_iter()
        .map(|p| p.id)
        .collect();

    population.sort_by_key(|id| id.distance(&target));
    let expected: Vec<NodeId> = population.into_iter().take(20).collect();
    assert_eq!(from_table, expected);
}
