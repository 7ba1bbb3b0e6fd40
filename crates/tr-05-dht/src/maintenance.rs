//! Singleton maintenance tasks.
//!
//! Each concern ticks on its own interval and never bursts: adaptive
//! bucket refresh, liveness probing of quiet peers, routine refresh of
//! the least-recently-updated bucket, and the stale/ban/storage/dedup
//! cleanup sweep.

use crate::core::DhtInner;
use crate::lookup::{self, LookupKind};
use crate::messaging;
use crate::state::DhtState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tr_01_routing::random_id_in_bucket;
use tracing::{debug, trace};

/// Spawn every maintenance task and record their handles.
pub(crate) fn spawn_all(inner: &Arc<DhtInner>) {
    let mut tasks = inner.tasks.lock();
    tasks.push(spawn_adaptive_refresh(inner.clone()));
    tasks.push(spawn_stale_ping(inner.clone()));
    tasks.push(spawn_bucket_maintenance(inner.clone()));
    tasks.push(spawn_cleanup(inner.clone()));
}

/// Current refresh interval: aggressive while under-connected or newly
/// joined, standard otherwise.
fn current_refresh_interval(inner: &Arc<DhtInner>) -> Duration {
    let under_connected = inner.routing.read().connected_alive() < inner.config.k / 2;
    let newly_joined = inner
        .joined_at
        .lock()
        .map(|at| at.elapsed() < inner.config.newly_joined_window)
        .unwrap_or(false);
    if under_connected || newly_joined {
        inner.config.refresh_aggressive
    } else {
        inner.config.refresh_standard
    }
}

/// Refresh buckets that saw no activity within twice the current
/// interval, one random in-range lookup each.
fn spawn_adaptive_refresh(inner: Arc<DhtInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval = current_refresh_interval(&inner);
            tokio::time::sleep(interval).await;

            if !matches!(inner.state(), DhtState::Running | DhtState::Bootstrapped) {
                continue;
            }

            let idle = interval
                .saturating_mul(2)
                .as_secs()
                .max(1);
            let indices = inner.routing.write().refresh_indices(idle);
            if indices.is_empty() {
                continue;
            }
            debug!(buckets = indices.len(), "Refreshing idle buckets");
            for index in indices {
                let target = {
                    let mut rng = rand::thread_rng();
                    random_id_in_bucket(&inner.local_id(), index, &mut rng)
                };
                let _ = lookup::iterative_lookup(&inner, target, LookupKind::Node, None).await;
            }
        }
    })
}

/// Probe peers that have been quiet past the ping interval.
fn spawn_stale_ping(inner: Arc<DhtInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let quiet: Vec<_> = inner
                .routing
                .read()
                .stale_peers(inner.config.ping_interval.as_secs())
                .into_iter()
                .filter(|id| inner.transport.is_connected(id))
                .collect();
            for peer in quiet {
                let inner = inner.clone();
                // Sequential probes: maintenance must not burst.
                let request_id = uuid::Uuid::new_v4().to_string();
                let frame = shared_types::Frame::Ping {
                    request_id: request_id.clone(),
                };
                match inner
                    .request(peer, request_id, frame, inner.config.round_timeout)
                    .await
                {
                    Ok(_) => inner.note_success(&peer),
                    Err(_) => inner.note_failure(&peer),
                }
            }
        }
    })
}

/// Routine refresh of the least-recently-updated non-empty bucket.
fn spawn_bucket_maintenance(inner: Arc<DhtInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.config.bucket_maintenance);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !inner.state().is_running() {
                continue;
            }
            let refresh_index = {
                let routing = inner.routing.read();
                routing
                    .table()
                    .bucket_for_refresh()
                    .map(|pos| routing.table().refresh_index(pos))
            };
            if let Some(index) = refresh_index {
                let target = {
                    let mut rng = rand::thread_rng();
                    random_id_in_bucket(&inner.local_id(), index, &mut rng)
                };
                trace!(bucket = index, "Routine bucket refresh");
                let _ = lookup::iterative_lookup(&inner, target, LookupKind::Node, None).await;
            }
        }
    })
}

/// Stale entries, expired bans, dead storage, and dedup window sweep.
fn spawn_cleanup(inner: Arc<DhtInner>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.config.stale_cleanup);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            let removed = {
                let mut routing = inner.routing.write();
                let removed = routing.sweep_stale();
                routing.gc_bans();
                removed
            };
            if !removed.is_empty() {
                debug!(count = removed.len(), "Swept stale peers");
            }

            let now_ms = inner.now_ms();
            inner.storage.write().gc(now_ms);
            messaging::gc_routed_seen(&inner);
        }
    })
}
