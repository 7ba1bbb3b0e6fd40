//! The DHT node: public operations, inbound RPC handling, lifecycle.

use crate::config::DhtConfig;
use crate::errors::DhtError;
use crate::lookup::{self, LookupKind};
use crate::messaging;
use crate::rpc::RpcTracker;
use crate::state::DhtState;
use crate::storage::ValueStore;
use parking_lot::{Mutex, RwLock};
use shared_bus::{EventFilter, InMemoryEventBus, PeerEvent};
use shared_types::rate_limiter::KeyedRateLimiter;
use shared_types::{Frame, NodeId, PeerDescriptor, PeerMetadata, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tr_01_routing::{random_id_in_bucket, PeerRecord, RoutingConfig, RoutingService, SystemTimeSource};
use tr_02_transport::{ConnectionManager, TransportError};
use tracing::{debug, info, trace, warn};
use trellis_telemetry::SafeMetrics;
use uuid::Uuid;

/// Application channel capacity (pub/sub frames awaiting the layer
/// above).
const APP_CHANNEL_CAPACITY: usize = 256;

/// A non-DHT frame surfaced to the application layer.
#[derive(Debug, Clone)]
pub struct AppFrame {
    pub from: NodeId,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    until: Instant,
}

pub(crate) struct DhtInner {
    pub(crate) config: DhtConfig,
    pub(crate) routing: RwLock<RoutingService>,
    pub(crate) transport: ConnectionManager,
    pub(crate) metrics: SafeMetrics,
    pub(crate) rpc: RpcTracker,
    pub(crate) storage: RwLock<ValueStore>,
    pub(crate) state_tx: watch::Sender<DhtState>,
    pub(crate) app_tx: mpsc::Sender<AppFrame>,
    pub(crate) find_node_last: Mutex<HashMap<NodeId, Instant>>,
    backoff: Mutex<HashMap<NodeId, Backoff>>,
    pub(crate) routed_seen: Mutex<HashMap<(String, NodeId), Instant>>,
    limiter: KeyedRateLimiter<NodeId>,
    pub(crate) joined_at: Mutex<Option<Instant>>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DhtInner {
    pub(crate) fn local_id(&self) -> NodeId {
        self.transport.local_id()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    pub(crate) fn state(&self) -> DhtState {
        *self.state_tx.borrow()
    }

    /// Whether `peer` is sitting out lookups after repeated failures.
    pub(crate) fn in_backoff(&self, peer: &NodeId) -> bool {
        self.backoff
            .lock()
            .get(peer)
            .map(|b| b.until > Instant::now())
            .unwrap_or(false)
    }

    /// Record an RPC failure: counts toward liveness and extends the
    /// per-peer backoff exponentially.
    pub(crate) fn note_failure(&self, peer: &NodeId) {
        let _ = self.routing.write().record_failure(peer);
        let mut backoff = self.backoff.lock();
        let entry = backoff.entry(*peer).or_insert(Backoff {
            failures: 0,
            until: Instant::now(),
        });
        entry.failures = entry.failures.saturating_add(1);
        let exp = entry.failures.min(16);
        let delay = self
            .config
            .backoff_base
            .saturating_mul(1u32 << exp.min(10))
            .min(self.config.backoff_cap);
        entry.until = Instant::now() + delay;
    }

    /// Record an RPC success: clears backoff and refreshes recency.
    pub(crate) fn note_success(&self, peer: &NodeId) {
        self.backoff.lock().remove(peer);
        let _ = self.routing.write().touch(peer);
    }

    /// Whether another FIND_NODE toward `peer` respects the spacing.
    pub(crate) fn find_node_spacing_ok(&self, peer: &NodeId) -> bool {
        self.find_node_last
            .lock()
            .get(peer)
            .map(|at| at.elapsed() >= self.config.find_node_spacing)
            .unwrap_or(true)
    }

    pub(crate) fn mark_find_node_sent(&self, peer: &NodeId) {
        self.find_node_last.lock().insert(*peer, Instant::now());
    }

    /// Absorb a peer learned from a lookup reply.
    pub(crate) fn learn_peer(&self, descriptor: &PeerDescriptor) {
        let now = Timestamp::now();
        let mut record = PeerRecord::from_descriptor(descriptor, now);
        record.connected = self.transport.is_connected(&descriptor.id);
        let _ = self.routing.write().add_node(record);
    }

    /// Make sure a link to the peer exists, dialing its published
    /// address when necessary.
    pub(crate) async fn ensure_connected(
        self: &Arc<Self>,
        descriptor: &PeerDescriptor,
    ) -> Result<(), DhtError> {
        let peer = descriptor.id;
        if self.transport.is_connected(&peer) {
            return Ok(());
        }
        let Some(addr) = descriptor
            .addr
            .clone()
            .or_else(|| descriptor.metadata.listening_address.clone())
        else {
            return Err(DhtError::Unreachable(peer.to_hex()));
        };
        self.transport
            .connect_expect(&addr, peer)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                TransportError::Timeout(t) => DhtError::RpcTimeout(t),
                other => DhtError::Unreachable(other.to_string()),
            })
    }

    /// Issue an RPC and await its reply.
    pub(crate) async fn request(
        self: &Arc<Self>,
        peer: NodeId,
        request_id: String,
        frame: Frame,
        timeout: Duration,
    ) -> Result<Frame, DhtError> {
        let tag = frame_tag(&frame);
        self.metrics.rpc_out(tag);

        let waiter = self.rpc.register(&request_id);
        if let Err(e) = self.transport.send(peer, frame) {
            self.rpc.abandon(&request_id);
            return Err(match e {
                TransportError::BackpressureDropped(p) => DhtError::Backpressure(p),
                other => DhtError::Unreachable(other.to_string()),
            });
        }

        let reply = match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => {
                self.rpc.abandon(&request_id);
                return Err(DhtError::Unreachable(peer.to_hex()));
            }
            Err(_) => {
                self.rpc.abandon(&request_id);
                return Err(DhtError::RpcTimeout(peer.to_hex()));
            }
        };

        if let Frame::RpcError {
            category, message, ..
        } = reply
        {
            return Err(DhtError::Remote { category, message });
        }
        Ok(reply)
    }

    /// Send a reply frame (no response expected).
    pub(crate) fn reply(&self, peer: NodeId, frame: Frame) {
        self.metrics.rpc_out(frame_tag(&frame));
        if let Err(e) = self.transport.send(peer, frame) {
            debug!(peer = %peer, error = %e, "Reply send failed");
        }
    }

    /// Dispatch one inbound frame from a connected peer.
    fn handle_frame(self: &Arc<Self>, peer: NodeId, frame: Frame) {
        self.metrics.rpc_in(frame_tag(&frame));

        // Replies route to their waiters; everything else is a request.
        if frame.is_response() {
            if let Some(request_id) = frame.request_id() {
                let request_id = request_id.to_string();
                if self.rpc.complete(&request_id, frame) {
                    return;
                }
                trace!(%request_id, "Late or unsolicited reply discarded");
            }
            return;
        }

        // The caller proved itself live; re-add before answering.
        self.refresh_caller(peer);

        if !self.limiter.try_acquire(&peer) {
            debug!(peer = %peer, "Inbound RPC rate limit exceeded");
            self.note_failure(&peer);
            return;
        }

        match frame {
            Frame::Ping { request_id } => {
                self.reply(
                    peer,
                    Frame::Pong {
                        request_id,
                        ts: Timestamp::now().as_secs(),
                    },
                );
            }
            Frame::FindNode { request_id, target, .. } => {
                let peers: Vec<PeerDescriptor> = self
                    .routing
                    .read()
                    .find_closest(&target, self.config.k)
                    .into_iter()
                    .filter(|p| p.id != peer)
                    .map(|p| p.to_descriptor())
                    .collect();
                self.reply(peer, Frame::Nodes { request_id, peers });
            }
            Frame::FindValue { request_id, key } => {
                let now_ms = self.now_ms();
                let value = self.storage.write().get(&key, now_ms);
                let reply = match value {
                    Some(value) => Frame::Value {
                        request_id,
                        found: true,
                        value: Some(value),
                        peers: None,
                    },
                    None => Frame::Value {
                        request_id,
                        found: false,
                        value: None,
                        peers: Some(
                            self.routing
                                .read()
                                .find_closest(&key, self.config.k)
                                .into_iter()
                                .filter(|p| p.id != peer)
                                .map(|p| p.to_descriptor())
                                .collect(),
                        ),
                    },
                };
                self.reply(peer, reply);
            }
            Frame::Store {
                request_id,
                key,
                value,
                expires_at,
            } => {
                let now_ms = self.now_ms();
                let ok = self.storage.write().put(key, value, expires_at, now_ms);
                self.reply(peer, Frame::Stored { request_id, ok });
            }
            Frame::DhtMessage {
                dest,
                hops_left,
                envelope,
                ..
            } => {
                messaging::handle_routed(self, peer, dest, hops_left, envelope);
            }
            Frame::PubsubSubscribe { .. }
            | Frame::PubsubUnsubscribe { .. }
            | Frame::PubsubPublish { .. }
            | Frame::PubsubPush { .. }
            | Frame::PubsubTopicInfo { .. }
            | Frame::Signal { .. } => {
                if self.app_tx.try_send(AppFrame { from: peer, frame }).is_err() {
                    warn!(peer = %peer, "Application channel full; frame dropped");
                }
            }
            other => {
                trace!(peer = %peer, frame = ?other, "Ignoring frame outside the peer vocabulary");
            }
        }
    }

    /// Re-add semantics for an RPC caller.
    fn refresh_caller(&self, peer: NodeId) {
        let mut routing = self.routing.write();
        if routing.contains(&peer) {
            let _ = routing.touch(&peer);
        } else {
            let mut record = PeerRecord::new(peer, Timestamp::now());
            record.connected = self.transport.is_connected(&peer);
            let _ = routing.add_node(record);
        }
    }

    /// Lifecycle: a link came up.
    fn on_peer_connected(self: &Arc<Self>, peer: NodeId, metadata: PeerMetadata) {
        let now = Timestamp::now();
        let mut record = PeerRecord::new(peer, now);
        record.connected = true;
        record.install_metadata(metadata);
        {
            let mut routing = self.routing.write();
            match routing.add_node(record) {
                Ok(_) => {
                    let _ = routing.mark_connected(&peer);
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Connected peer not admitted to table");
                    return;
                }
            }
        }

        // One-shot refresh of the affected bucket once we are live.
        if self.state().is_running() {
            if let Some(index) = self.routing.read().table().bucket_index_of(&peer) {
                let inner = self.clone();
                tokio::spawn(async move {
                    let target = {
                        let mut rng = rand::thread_rng();
                        random_id_in_bucket(&inner.local_id(), index, &mut rng)
                    };
                    let _ = lookup::iterative_lookup(&inner, target, LookupKind::Node, None).await;
                });
            }
        }
    }

    /// Lifecycle: a link went away.
    fn on_peer_disconnected(&self, peer: NodeId) {
        let mut routing = self.routing.write();
        let _ = routing.record_failure(&peer);
        let _ = routing.mark_disconnected(&peer);
        let _ = routing.remove_node(&peer);
        self.limiter.remove(&peer);
    }
}

/// Wire tag of a frame, for metrics.
fn frame_tag(frame: &Frame) -> &'static str {
    match frame {
        Frame::Hello { .. } => "hello",
        Frame::Ping { .. } => "ping",
        Frame::Pong { .. } => "pong",
        Frame::FindNode { .. } => "find_node",
        Frame::Nodes { .. } => "nodes",
        Frame::FindValue { .. } => "find_value",
        Frame::Value { .. } => "value",
        Frame::Store { .. } => "store",
        Frame::Stored { .. } => "stored",
        Frame::DhtMessage { .. } => "dht_message",
        Frame::PubsubSubscribe { .. } => "pubsub_subscribe",
        Frame::PubsubSubscribed { .. } => "pubsub_subscribed",
        Frame::PubsubUnsubscribe { .. } => "pubsub_unsubscribe",
        Frame::PubsubPublish { .. } => "pubsub_publish",
        Frame::PubsubPublished { .. } => "pubsub_published",
        Frame::PubsubPush { .. } => "pubsub_push",
        Frame::PubsubTopicInfo { .. } => "pubsub_topic_info",
        Frame::PubsubTopicInfoResult { .. } => "pubsub_topic_info_result",
        Frame::RpcError { .. } => "rpc_error",
        Frame::Signal { .. } => "signal",
        _ => "bootstrap",
    }
}

/// The DHT engine handle.
#[derive(Clone)]
pub struct DhtNode {
    pub(crate) inner: Arc<DhtInner>,
}

impl DhtNode {
    /// Build the node and start its event loop and maintenance tasks.
    ///
    /// Returns the node plus the application frame channel the pub/sub
    /// layer consumes.
    pub fn new(
        transport: ConnectionManager,
        bus: Arc<InMemoryEventBus>,
        metrics: SafeMetrics,
        config: DhtConfig,
    ) -> (Self, mpsc::Receiver<AppFrame>) {
        let local_id = transport.local_id();
        let routing_config = RoutingConfig {
            k: config.k,
            alpha: config.alpha,
            ..RoutingConfig::default()
        };
        let routing = RoutingService::new(local_id, routing_config, Box::new(SystemTimeSource::new()));
        let (state_tx, _) = watch::channel(DhtState::New);
        let (app_tx, app_rx) = mpsc::channel(APP_CHANNEL_CAPACITY);
        let storage_capacity = config.storage_capacity;

        let inner = Arc::new(DhtInner {
            config,
            routing: RwLock::new(routing),
            transport,
            metrics,
            rpc: RpcTracker::new(),
            storage: RwLock::new(ValueStore::new(storage_capacity)),
            state_tx,
            app_tx,
            find_node_last: Mutex::new(HashMap::new()),
            backoff: Mutex::new(HashMap::new()),
            routed_seen: Mutex::new(HashMap::new()),
            limiter: shared_types::rate_limiter::presets::inbound_rpc(),
            joined_at: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        // Subscribe before spawning so no event is missed.
        let mut events = bus.subscribe(EventFilter::all());
        let loop_inner = inner.clone();
        let event_loop = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::Connected { peer, metadata, .. } => {
                        loop_inner.on_peer_connected(peer, metadata);
                    }
                    PeerEvent::Disconnected { peer } => {
                        loop_inner.on_peer_disconnected(peer);
                    }
                    PeerEvent::Frame { peer, frame } => {
                        loop_inner.handle_frame(peer, frame);
                    }
                    PeerEvent::BackpressureDropped { peer } => {
                        loop_inner.note_failure(&peer);
                    }
                }
            }
        });
        inner.tasks.lock().push(event_loop);

        crate::maintenance::spawn_all(&inner);

        (Self { inner }, app_rx)
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.local_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DhtState {
        self.inner.state()
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<DhtState> {
        self.inner.state_tx.subscribe()
    }

    /// Drive a lifecycle transition.
    pub fn set_state(&self, next: DhtState) -> Result<(), DhtError> {
        let current = self.inner.state();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(DhtError::Protocol(format!(
                "illegal state transition {current} -> {next}"
            )));
        }
        if next == DhtState::Running {
            *self.inner.joined_at.lock() = Some(Instant::now());
        }
        info!(from = %current, to = %next, "DHT state transition");
        // send_replace updates the value even with no live observers.
        self.inner.state_tx.send_replace(next);
        Ok(())
    }

    /// Connected, live peer count.
    pub fn connected_alive(&self) -> usize {
        self.inner.routing.read().connected_alive()
    }

    /// Routing table snapshot.
    pub fn routing_snapshot(&self) -> Vec<PeerRecord> {
        self.inner.routing.read().snapshot()
    }

    /// Routing table health.
    pub fn routing_stats(&self) -> tr_01_routing::RoutingTableStats {
        self.inner.routing.read().stats()
    }

    /// Iterative node lookup: the k closest peers to `target`.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<PeerDescriptor>, DhtError> {
        let outcome =
            lookup::iterative_lookup(&self.inner, target, LookupKind::Node, None).await;
        Ok(outcome.closest)
    }

    /// Redundant lookup tolerating unreliable peers.
    pub async fn find_node_redundant(
        &self,
        target: NodeId,
        redundancy: usize,
    ) -> Result<Vec<PeerDescriptor>, DhtError> {
        let outcome = lookup::redundant_lookup(&self.inner, target, redundancy).await;
        Ok(outcome.closest)
    }

    /// Value lookup with response-path caching.
    pub async fn find_value(&self, key: NodeId) -> Result<Option<serde_json::Value>, DhtError> {
        // Local store first.
        let now_ms = self.inner.now_ms();
        if let Some(value) = self.inner.storage.write().get(&key, now_ms) {
            return Ok(Some(value));
        }

        let outcome =
            lookup::iterative_lookup(&self.inner, key, LookupKind::Value, None).await;
        let Some(value) = outcome.value.clone() else {
            return Ok(None);
        };

        // Cache at the closest queried peer that did not hold it.
        if let Some(holder) = outcome.value_holder {
            let cache_target = outcome
                .closest
                .iter()
                .find(|d| d.id != holder && outcome.queried.contains(&d.id))
                .cloned();
            if let Some(descriptor) = cache_target {
                let inner = self.inner.clone();
                let value = value.clone();
                let expires_at = self.inner.now_ms() + 10 * 60 * 1000;
                tokio::spawn(async move {
                    let _ = store_to(&inner, &descriptor, key, value, expires_at).await;
                });
            }
        }

        Ok(Some(value))
    }

    /// Store a record at the `replicate` closest peers.
    ///
    /// Returns the number of acknowledgements; zero is legal for a
    /// network of one.
    pub async fn store(
        &self,
        key: NodeId,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<usize, DhtError> {
        let now_ms = self.inner.now_ms();
        let expires_at = now_ms + ttl.as_millis() as u64;

        // We are always one of the closest we know about.
        self.inner
            .storage
            .write()
            .put(key, value.clone(), expires_at, now_ms);

        let outcome =
            lookup::iterative_lookup(&self.inner, key, LookupKind::Node, None).await;
        let mut acks = 0;
        for descriptor in outcome.closest.iter().take(self.inner.config.replicate) {
            if descriptor.id == self.local_id() {
                continue;
            }
            match store_to(&self.inner, descriptor, key, value.clone(), expires_at).await {
                Ok(true) => {
                    acks += 1;
                    self.inner.metrics.store_ack();
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(peer = %descriptor.id, error = %e, "Store replication failed");
                }
            }
        }
        Ok(acks)
    }

    /// Probe a peer and record its round trip.
    pub async fn ping(&self, peer: NodeId) -> Result<Duration, DhtError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let frame = Frame::Ping {
            request_id: request_id.clone(),
        };
        let reply = self
            .inner
            .request(peer, request_id, frame, self.inner.config.round_timeout)
            .await;
        match reply {
            Ok(Frame::Pong { .. }) => {
                let rtt = started.elapsed();
                let _ = self
                    .inner
                    .routing
                    .write()
                    .record_ping(&peer, rtt.as_millis() as u64);
                self.inner.note_success(&peer);
                Ok(rtt)
            }
            Ok(other) => Err(DhtError::Protocol(format!("expected pong, got {other:?}"))),
            Err(e) => {
                self.inner.note_failure(&peer);
                Err(e)
            }
        }
    }

    /// Issue an arbitrary RPC (used by the pub/sub layer).
    pub async fn request(
        &self,
        peer: NodeId,
        request_id: String,
        frame: Frame,
        timeout: Duration,
    ) -> Result<Frame, DhtError> {
        self.inner.request(peer, request_id, frame, timeout).await
    }

    /// Send a reply frame toward a peer.
    pub fn reply(&self, peer: NodeId, frame: Frame) {
        self.inner.reply(peer, frame)
    }

    /// Ensure a link to a described peer exists.
    pub async fn ensure_connected(&self, descriptor: &PeerDescriptor) -> Result<(), DhtError> {
        self.inner.ensure_connected(descriptor).await
    }

    /// Originate a routed overlay message toward `dest`.
    pub fn send_routed(
        &self,
        dest: NodeId,
        payload: serde_json::Value,
    ) -> Result<String, DhtError> {
        messaging::send_routed(&self.inner, dest, payload)
    }

    /// Local value store insert (coordinator-side topic state).
    pub fn store_local(&self, key: NodeId, value: serde_json::Value, ttl: Duration) -> bool {
        let now_ms = self.inner.now_ms();
        self.inner
            .storage
            .write()
            .put(key, value, now_ms + ttl.as_millis() as u64, now_ms)
    }

    /// Local value store read.
    pub fn fetch_local(&self, key: NodeId) -> Option<serde_json::Value> {
        let now_ms = self.inner.now_ms();
        self.inner.storage.write().get(&key, now_ms)
    }

    /// Stop every task this node spawned.
    pub fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Store a record at one peer, dialing if needed.
pub(crate) async fn store_to(
    inner: &Arc<DhtInner>,
    descriptor: &PeerDescriptor,
    key: NodeId,
    value: serde_json::Value,
    expires_at: u64,
) -> Result<bool, DhtError> {
    inner.ensure_connected(descriptor).await?;
    let request_id = Uuid::new_v4().to_string();
    let frame = Frame::Store {
        request_id: request_id.clone(),
        key,
        value,
        expires_at,
    };
    let reply = inner
        .request(descriptor.id, request_id, frame, inner.config.round_timeout)
        .await?;
    match reply {
        Frame::Stored { ok, .. } => Ok(ok),
        other => Err(DhtError::Protocol(format!("expected stored, got {other:?}"))),
    }
}
