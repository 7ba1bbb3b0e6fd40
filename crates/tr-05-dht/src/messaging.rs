//! Hop-bounded overlay routing for application messages.
//!
//! A `dht_message` addressed to a peer we are not forwards toward the
//! destination through the closest connected peer. Identical
//! `(id, origin)` pairs are dropped for a bounded window, which stops
//! both forwarding loops and retransmission storms.

use crate::core::{AppFrame, DhtInner};
use shared_types::{Frame, NodeId, RoutedEnvelope};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Originate a routed message toward `dest`.
pub(crate) fn send_routed(
    inner: &Arc<DhtInner>,
    dest: NodeId,
    payload: serde_json::Value,
) -> Result<String, crate::errors::DhtError> {
    let envelope = RoutedEnvelope {
        id: Uuid::new_v4().to_string(),
        origin: inner.local_id(),
        payload,
    };
    let id = envelope.id.clone();
    // Mark our own message seen so a routing loop can never hand it
    // back to us as fresh.
    remember(inner, &envelope);
    forward(inner, dest, inner.config.hop_budget, envelope)?;
    Ok(id)
}

/// Handle an inbound `dht_message`.
pub(crate) fn handle_routed(
    inner: &Arc<DhtInner>,
    from: NodeId,
    dest: NodeId,
    hops_left: u32,
    envelope: RoutedEnvelope,
) {
    if is_duplicate(inner, &envelope) {
        inner.metrics.dedup_drop();
        trace!(id = %envelope.id, "Duplicate routed message dropped");
        return;
    }
    remember(inner, &envelope);

    if dest == inner.local_id() {
        deliver(inner, envelope);
        return;
    }

    if hops_left == 0 {
        debug!(id = %envelope.id, %dest, "Hop budget exhausted; dropping");
        return;
    }

    if let Err(e) = forward_excluding(inner, dest, hops_left - 1, envelope, &[from]) {
        debug!(%dest, error = %e, "No forward path for routed message");
    }
}

/// Deliver a message addressed to us: the payload is handed to the
/// application channel as if it were a direct frame from the origin.
fn deliver(inner: &Arc<DhtInner>, envelope: RoutedEnvelope) {
    let origin = envelope.origin;
    match serde_json::from_value::<Frame>(envelope.payload.clone()) {
        Ok(frame) => {
            if inner
                .app_tx
                .try_send(AppFrame {
                    from: origin,
                    frame,
                })
                .is_err()
            {
                warn!("Application channel full; routed message dropped");
            }
        }
        Err(_) => {
            trace!(id = %envelope.id, "Routed payload is not a frame; ignored");
        }
    }
}

fn forward(
    inner: &Arc<DhtInner>,
    dest: NodeId,
    hops_left: u32,
    envelope: RoutedEnvelope,
) -> Result<(), crate::errors::DhtError> {
    forward_excluding(inner, dest, hops_left, envelope, &[])
}

/// Pick the next hop: the connected peer closest to the destination,
/// excluding where the message came from.
fn forward_excluding(
    inner: &Arc<DhtInner>,
    dest: NodeId,
    hops_left: u32,
    envelope: RoutedEnvelope,
    exclude: &[NodeId],
) -> Result<(), crate::errors::DhtError> {
    // Direct link wins outright.
    let next_hop = if inner.transport.is_connected(&dest) {
        Some(dest)
    } else {
        inner
            .routing
            .read()
            .find_closest_alive(&dest, inner.config.k)
            .into_iter()
            .map(|p| p.id)
            .find(|id| !exclude.contains(id) && *id != envelope.origin)
    };

    let Some(next) = next_hop else {
        return Err(crate::errors::DhtError::Unreachable(dest.to_hex()));
    };

    let frame = Frame::DhtMessage {
        request_id: None,
        dest,
        hops_left,
        envelope,
    };
    inner.metrics.rpc_out("dht_message");
    inner
        .transport
        .send(next, frame)
        .map_err(|e| crate::errors::DhtError::Unreachable(e.to_string()))
}

fn is_duplicate(inner: &Arc<DhtInner>, envelope: &RoutedEnvelope) -> bool {
    inner
        .routed_seen
        .lock()
        .contains_key(&(envelope.id.clone(), envelope.origin))
}

fn remember(inner: &Arc<DhtInner>, envelope: &RoutedEnvelope) {
    inner
        .routed_seen
        .lock()
        .insert((envelope.id.clone(), envelope.origin), Instant::now());
}

/// Drop dedup entries older than the window.
pub(crate) fn gc_routed_seen(inner: &Arc<DhtInner>) -> usize {
    let window = inner.config.routed_dedup_window;
    let mut seen = inner.routed_seen.lock();
    let before = seen.len();
    seen.retain(|_, at| at.elapsed() < window);
    before - seen.len()
}
