//! Iterative α-parallel lookups.
//!
//! Classic Kademlia node lookup: keep a shortlist sorted by distance to
//! the target, query up to α of the closest unqueried candidates per
//! round, merge every reply, and stop when a round discovers nothing
//! strictly closer (or the round cap trips). Failures remove a peer
//! from the round, never fail the lookup; peers that keep failing sit
//! out subsequent lookups until their backoff lapses.
//!
//! Inactive peers (hidden client tabs) are queried on a short fuse so a
//! sleeping phone can never stall a round.

use crate::core::DhtInner;
use crate::errors::DhtError;
use shared_types::{Frame, NodeId, PeerDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, trace};
use uuid::Uuid;

/// What the lookup is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupKind {
    Node,
    Value,
}

/// Result of one iterative lookup.
#[derive(Debug, Default)]
pub(crate) struct LookupOutcome {
    /// Closest known peers, ascending by distance, at most k.
    pub closest: Vec<PeerDescriptor>,
    /// The value, when a `find_value` hit.
    pub value: Option<serde_json::Value>,
    /// Who served the value.
    pub value_holder: Option<NodeId>,
    /// Peers successfully queried, in query order.
    pub queried: Vec<NodeId>,
    /// Rounds executed.
    pub rounds: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    descriptor: PeerDescriptor,
    queried: bool,
}

/// Run an iterative lookup. `seeds` overrides the routing-table seed
/// set (used by the redundant variant for disjoint starts).
pub(crate) async fn iterative_lookup(
    inner: &Arc<DhtInner>,
    target: NodeId,
    kind: LookupKind,
    seeds: Option<Vec<PeerDescriptor>>,
) -> LookupOutcome {
    let started = Instant::now();
    let k = inner.config.k;
    let alpha = inner.config.alpha;

    let seed_descriptors: Vec<PeerDescriptor> = match seeds {
        Some(seeds) => seeds,
        None => inner
            .routing
            .read()
            .find_closest_alive(&target, k)
            .into_iter()
            .map(|p| p.to_descriptor())
            .collect(),
    };

    // Record that this region of the id space saw traffic.
    inner.routing.write().stamp_activity(&target);

    let mut outcome = LookupOutcome::default();
    if seed_descriptors.is_empty() {
        // Zero candidates is a legal result, not an error.
        return outcome;
    }

    let local_id = inner.local_id();
    let mut shortlist: HashMap<NodeId, Candidate> = HashMap::new();
    for descriptor in seed_descriptors {
        if descriptor.id != local_id {
            shortlist.insert(
                descriptor.id,
                Candidate {
                    descriptor,
                    queried: false,
                },
            );
        }
    }

    if shortlist.is_empty() {
        return outcome;
    }

    let mut failed: HashSet<NodeId> = HashSet::new();
    let mut best_distance = shortlist
        .keys()
        .map(|id| id.distance(&target))
        .min()
        .expect("non-empty shortlist");

    for round in 1..=inner.config.max_rounds {
        outcome.rounds = round;

        // Whole-lookup budget; late outstanding replies are discarded
        // by the tracker when they eventually arrive.
        if started.elapsed() >= inner.config.lookup_timeout {
            debug!(%target, round, "Lookup budget exhausted; returning best known");
            break;
        }

        // Up to alpha closest unqueried, eligible candidates. Inactive
        // peers (hidden tabs) are only chosen once the live candidates
        // run out.
        let mut unqueried: Vec<PeerDescriptor> = shortlist
            .values()
            .filter(|c| !c.queried && !failed.contains(&c.descriptor.id))
            .map(|c| c.descriptor.clone())
            .collect();
        unqueried.sort_by_key(|d| d.id.distance(&target));
        let (active, inactive): (Vec<_>, Vec<_>) = unqueried
            .into_iter()
            .partition(|d| !d.metadata.is_inactive());

        let mut picked = Vec::new();
        for descriptor in active.into_iter().chain(inactive) {
            if picked.len() >= alpha {
                break;
            }
            if inner.in_backoff(&descriptor.id) {
                continue;
            }
            if kind == LookupKind::Node && !inner.find_node_spacing_ok(&descriptor.id) {
                continue;
            }
            picked.push(descriptor);
        }
        if picked.is_empty() {
            break;
        }

        let mut queries: JoinSet<(NodeId, Result<Frame, DhtError>)> = JoinSet::new();
        for descriptor in picked {
            let peer = descriptor.id;
            shortlist
                .get_mut(&peer)
                .expect("picked from shortlist")
                .queried = true;
            if kind == LookupKind::Node {
                inner.mark_find_node_sent(&peer);
            }

            let inner = inner.clone();
            queries.spawn(async move {
                let result = query_peer(&inner, &descriptor, target, kind).await;
                (peer, result)
            });
        }

        let mut round_best: Option<shared_types::Distance> = None;
        while let Some(joined) = queries.join_next().await {
            let Ok((peer, result)) = joined else { continue };
            match result {
                Ok(Frame::Nodes { peers, .. })
                | Ok(Frame::Value {
                    found: false,
                    peers: Some(peers),
                    ..
                }) => {
                    inner.note_success(&peer);
                    outcome.queried.push(peer);
                    for descriptor in peers {
                        if descriptor.id == local_id {
                            continue;
                        }
                        let distance = descriptor.id.distance(&target);
                        if round_best.map_or(true, |b| distance < b) {
                            round_best = Some(distance);
                        }
                        inner.learn_peer(&descriptor);
                        shortlist.entry(descriptor.id).or_insert(Candidate {
                            descriptor,
                            queried: false,
                        });
                    }
                }
                Ok(Frame::Value {
                    found: true, value, ..
                }) => {
                    inner.note_success(&peer);
                    outcome.queried.push(peer);
                    outcome.value = value;
                    outcome.value_holder = Some(peer);
                    queries.abort_all();
                    break;
                }
                Ok(other) => {
                    trace!(peer = %peer, frame = ?other, "Unexpected lookup reply");
                    inner.note_failure(&peer);
                    failed.insert(peer);
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Lookup query failed");
                    inner.note_failure(&peer);
                    failed.insert(peer);
                }
            }
        }

        if outcome.value.is_some() {
            break;
        }

        // Progress check: stop once a full round gets no closer.
        match round_best {
            Some(distance) if distance < best_distance => best_distance = distance,
            _ => break,
        }
    }

    let mut ids: Vec<NodeId> = shortlist.keys().copied().collect();
    ids.sort_by_key(|id| id.distance(&target));
    outcome.closest = ids
        .into_iter()
        .filter_map(|id| shortlist.get(&id).map(|c| c.descriptor.clone()))
        .take(k)
        .collect();

    inner
        .metrics
        .lookup_completed(started.elapsed().as_secs_f64());
    outcome
}

/// Query one candidate, dialing it first if we only know its address.
async fn query_peer(
    inner: &Arc<DhtInner>,
    descriptor: &PeerDescriptor,
    target: NodeId,
    kind: LookupKind,
) -> Result<Frame, DhtError> {
    let peer = descriptor.id;
    inner.ensure_connected(descriptor).await?;

    let inactive = descriptor.metadata.is_inactive()
        || inner
            .routing
            .read()
            .get(&peer)
            .map(|p| p.metadata.is_inactive())
            .unwrap_or(false);
    let timeout = if inactive {
        inner.config.fast_timeout
    } else {
        inner.config.round_timeout
    };

    let request_id = Uuid::new_v4().to_string();
    let frame = match kind {
        LookupKind::Node => Frame::FindNode {
            request_id: request_id.clone(),
            target,
            fast: if inactive { Some(true) } else { None },
        },
        LookupKind::Value => Frame::FindValue {
            request_id: request_id.clone(),
            key: target,
        },
    };

    inner.request(peer, request_id, frame, timeout).await
}

/// Redundant lookup: `r` parallel runs from disjoint seed sets, merged.
pub(crate) async fn redundant_lookup(
    inner: &Arc<DhtInner>,
    target: NodeId,
    redundancy: usize,
) -> LookupOutcome {
    let redundancy = redundancy.max(1);
    let seeds: Vec<PeerDescriptor> = inner
        .routing
        .read()
        .find_closest_alive(&target, inner.config.k * redundancy)
        .into_iter()
        .map(|p| p.to_descriptor())
        .collect();

    // Round-robin partition keeps every seed set spread across the
    // distance range instead of giving one run all the close peers.
    let mut partitions: Vec<Vec<PeerDescriptor>> = vec![Vec::new(); redundancy];
    for (i, descriptor) in seeds.into_iter().enumerate() {
        partitions[i % redundancy].push(descriptor);
    }

    let mut runs: JoinSet<LookupOutcome> = JoinSet::new();
    for partition in partitions.into_iter().filter(|p| !p.is_empty()) {
        let inner = inner.clone();
        runs.spawn(async move {
            iterative_lookup(&inner, target, LookupKind::Node, Some(partition)).await
        });
    }

    let mut merged: HashMap<NodeId, PeerDescriptor> = HashMap::new();
    let mut rounds = 0;
    let mut queried = Vec::new();
    while let Some(run) = runs.join_next().await {
        let Ok(outcome) = run else { continue };
        rounds = rounds.max(outcome.rounds);
        queried.extend(outcome.queried);
        for descriptor in outcome.closest {
            merged.entry(descriptor.id).or_insert(descriptor);
        }
    }

    let mut ids: Vec<NodeId> = merged.keys().copied().collect();
    ids.sort_by_key(|id| id.distance(&target));
    LookupOutcome {
        closest: ids
            .into_iter()
            .filter_map(|id| merged.remove(&id))
            .take(inner.config.k)
            .collect(),
        value: None,
        value_holder: None,
        queried,
        rounds,
    }
}
