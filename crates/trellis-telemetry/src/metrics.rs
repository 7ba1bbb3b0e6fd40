//! Prometheus metrics for the overlay.
//!
//! Naming convention: `trellis_<area>_<metric>_<unit>`.
//!
//! All access goes through [`SafeMetrics`]. The registry and every
//! instrument are built once; if anything fails to register, the handle
//! comes up disabled and every call is a no-op. There is no unwrapping
//! anywhere on this path.

use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts,
    Registry, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

struct Instruments {
    registry: Registry,
    /// Inbound RPC frames by type.
    rpc_in: CounterVec,
    /// Outbound RPC frames by type.
    rpc_out: CounterVec,
    /// Completed iterative lookups.
    lookups: IntCounter,
    /// Lookup wall time.
    lookup_duration: Histogram,
    /// Peer round-trip times.
    rtt: Histogram,
    /// Store acknowledgements received.
    store_acks: IntCounter,
    /// Pub/sub publishes accepted by a coordinator.
    publishes: IntCounter,
    /// Duplicate messages discarded.
    dedup_drops: IntCounter,
    /// Outbound frames dropped to backpressure.
    backpressure_drops: IntCounter,
    /// Currently connected peers.
    peers_connected: Gauge,
}

impl Instruments {
    fn build() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rpc_in = CounterVec::new(
            Opts::new("trellis_rpc_inbound_total", "Inbound RPC frames by type"),
            &["frame"],
        )?;
        let rpc_out = CounterVec::new(
            Opts::new("trellis_rpc_outbound_total", "Outbound RPC frames by type"),
            &["frame"],
        )?;
        let lookups = IntCounter::new("trellis_dht_lookups_total", "Completed iterative lookups")?;
        let lookup_duration = Histogram::with_opts(
            HistogramOpts::new(
                "trellis_dht_lookup_duration_seconds",
                "Iterative lookup wall time",
            )
            .buckets(exponential_buckets(0.01, 2.0, 12)?),
        )?;
        let rtt = Histogram::with_opts(
            HistogramOpts::new("trellis_peer_rtt_seconds", "Peer ping round-trip time")
                .buckets(exponential_buckets(0.001, 2.0, 14)?),
        )?;
        let store_acks =
            IntCounter::new("trellis_dht_store_acks_total", "Store acknowledgements received")?;
        let publishes =
            IntCounter::new("trellis_pubsub_publishes_total", "Accepted topic publications")?;
        let dedup_drops =
            IntCounter::new("trellis_pubsub_dedup_drops_total", "Duplicate messages discarded")?;
        let backpressure_drops = IntCounter::new(
            "trellis_transport_backpressure_drops_total",
            "Outbound frames dropped because a peer buffer was full",
        )?;
        let peers_connected =
            Gauge::new("trellis_transport_peers_connected", "Currently connected peers")?;

        registry.register(Box::new(rpc_in.clone()))?;
        registry.register(Box::new(rpc_out.clone()))?;
        registry.register(Box::new(lookups.clone()))?;
        registry.register(Box::new(lookup_duration.clone()))?;
        registry.register(Box::new(rtt.clone()))?;
        registry.register(Box::new(store_acks.clone()))?;
        registry.register(Box::new(publishes.clone()))?;
        registry.register(Box::new(dedup_drops.clone()))?;
        registry.register(Box::new(backpressure_drops.clone()))?;
        registry.register(Box::new(peers_connected.clone()))?;

        Ok(Self {
            registry,
            rpc_in,
            rpc_out,
            lookups,
            lookup_duration,
            rtt,
            store_acks,
            publishes,
            dedup_drops,
            backpressure_drops,
            peers_connected,
        })
    }
}

/// Metrics handle the core threads through its `NodeContext`.
///
/// Cheap to clone. Never panics, never returns an error to the caller;
/// a failed registry leaves the handle permanently disabled.
#[derive(Clone)]
pub struct SafeMetrics {
    inner: Option<Arc<Instruments>>,
    disabled: Arc<AtomicBool>,
}

impl SafeMetrics {
    /// Build a live handle, or a disabled one if registration fails.
    pub fn new() -> Self {
        match Instruments::build() {
            Ok(instruments) => Self {
                inner: Some(Arc::new(instruments)),
                disabled: Arc::new(AtomicBool::new(false)),
            },
            Err(e) => {
                warn!(error = %e, "Metrics registration failed; telemetry disabled");
                Self::disabled()
            }
        }
    }

    /// A handle that records nothing.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            disabled: Arc::new(AtomicBool::new(true)),
        }
    }

    fn with<F: FnOnce(&Instruments)>(&self, f: F) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        if let Some(inner) = &self.inner {
            f(inner);
        }
    }

    pub fn rpc_in(&self, frame: &str) {
        self.with(|m| m.rpc_in.with_label_values(&[frame]).inc());
    }

    pub fn rpc_out(&self, frame: &str) {
        self.with(|m| m.rpc_out.with_label_values(&[frame]).inc());
    }

    pub fn lookup_completed(&self, seconds: f64) {
        self.with(|m| {
            m.lookups.inc();
            m.lookup_duration.observe(seconds);
        });
    }

    pub fn rtt_observed(&self, seconds: f64) {
        self.with(|m| m.rtt.observe(seconds));
    }

    pub fn store_ack(&self) {
        self.with(|m| m.store_acks.inc());
    }

    pub fn publish_accepted(&self) {
        self.with(|m| m.publishes.inc());
    }

    pub fn dedup_drop(&self) {
        self.with(|m| m.dedup_drops.inc());
    }

    pub fn backpressure_drop(&self) {
        self.with(|m| m.backpressure_drops.inc());
    }

    pub fn peers_connected(&self, count: usize) {
        self.with(|m| m.peers_connected.set(count as f64));
    }

    /// Render the registry in the Prometheus text format.
    ///
    /// An encoding failure disables the handle and returns an empty
    /// string; the caller's response path is unaffected.
    pub fn render(&self) -> String {
        if self.disabled.load(Ordering::Relaxed) {
            return String::new();
        }
        let Some(inner) = &self.inner else {
            return String::new();
        };
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        match encoder.encode(&inner.registry.gather(), &mut buffer) {
            Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Metrics encoding failed; telemetry disabled");
                self.disabled.store(true, Ordering::Relaxed);
                String::new()
            }
        }
    }
}

impl Default for SafeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_handle_records_and_renders() {
        let metrics = SafeMetrics::new();
        metrics.rpc_in("find_node");
        metrics.rpc_in("find_node");
        metrics.peers_connected(3);

        let rendered = metrics.render();
        assert!(rendered.contains("trellis_rpc_inbound_total"));
        assert!(rendered.contains("trellis_transport_peers_connected 3"));
    }

    #[test]
    fn disabled_handle_is_a_no_op() {
        let metrics = SafeMetrics::disabled();
        metrics.rpc_in("ping");
        metrics.lookup_completed(0.5);
        assert_eq!(metrics.render(), "");
    }

    #[test]
    fn clones_share_the_registry() {
        let metrics = SafeMetrics::new();
        let clone = metrics.clone();
        clone.store_ack();
        assert!(metrics.render().contains("trellis_dht_store_acks_total 1"));
    }
}
