//! The connection manager: every live link, one owner.
//!
//! Links are registered here after the HELLO gate, keyed by durable
//! node id. Each link has an mpsc writer mailbox (per-peer FIFO), a
//! bounded send buffer (full buffer ⇒ drop and report), keep-alive
//! accounting, and an epoch guard so a replaced link can never clean up
//! its successor.
//!
//! Dial collisions resolve deterministically: the side with the
//! lexicographically smaller node id keeps its outbound link, the other
//! side's initiator link is dropped, and at most one `Connected` event
//! surfaces per peer.

use crate::config::TransportConfig;
use crate::datagram::DatagramState;
use crate::errors::TransportError;
use crate::framing::{read_frame, write_frame};
use crate::hello::{LocalHello, RemoteHello};
use crate::stream;
use parking_lot::{Mutex, RwLock};
use shared_bus::{EventPublisher, InMemoryEventBus, PeerEvent};
use shared_types::{Frame, NodeId, PeerMetadata};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trellis_telemetry::SafeMetrics;
use uuid::Uuid;

/// Request-id prefix marking transport-internal keep-alive probes.
pub(crate) const KEEPALIVE_PREFIX: &str = "keepalive-";

/// Per-link counters and keep-alive state.
#[derive(Debug)]
pub struct LinkStats {
    pub(crate) opened_at: Instant,
    pub(crate) last_activity: Mutex<Instant>,
    pub(crate) frames_in: AtomicU64,
    pub(crate) frames_out: AtomicU64,
    pub(crate) drops: AtomicU64,
    pub(crate) missed_keepalives: AtomicU32,
    pub(crate) pending_ping: Mutex<Option<(String, Instant)>>,
    pub(crate) last_ping_sent: Mutex<Option<Instant>>,
    pub(crate) rtt_ms: AtomicU64,
}

impl LinkStats {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            opened_at: now,
            last_activity: Mutex::new(now),
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            missed_keepalives: AtomicU32::new(0),
            pending_ping: Mutex::new(None),
            last_ping_sent: Mutex::new(None),
            rtt_ms: AtomicU64::new(0),
        }
    }

    /// Latest RTT estimate in milliseconds, zero before the first probe.
    pub fn rtt_ms(&self) -> u64 {
        self.rtt_ms.load(Ordering::Relaxed)
    }

    pub fn frames_in(&self) -> u64 {
        self.frames_in.load(Ordering::Relaxed)
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

pub(crate) struct Link {
    pub(crate) sender: mpsc::Sender<Frame>,
    pub(crate) initiator: bool,
    pub(crate) epoch: u64,
    pub(crate) announced: bool,
    pub(crate) stats: Arc<LinkStats>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    /// Remote datagram address, for UDP links.
    pub(crate) udp_addr: Option<SocketAddr>,
}

pub(crate) struct ManagerInner {
    pub(crate) hello: RwLock<LocalHello>,
    pub(crate) config: TransportConfig,
    pub(crate) bus: Arc<InMemoryEventBus>,
    pub(crate) metrics: SafeMetrics,
    pub(crate) links: RwLock<HashMap<NodeId, Link>>,
    pub(crate) backgrounded: AtomicBool,
    pub(crate) epoch_counter: AtomicU64,
    pub(crate) datagram: RwLock<Option<Arc<DatagramState>>>,
    pub(crate) service_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ManagerInner {
    pub(crate) fn local_id(&self) -> NodeId {
        self.hello.read().node_id
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a freshly handshaken link, resolving collisions.
    ///
    /// Returns `false` when an existing link won the collision and the
    /// new one was dropped.
    pub(crate) fn register_link(
        self: &Arc<Self>,
        remote: &RemoteHello,
        initiator: bool,
        sender: mpsc::Sender<Frame>,
        stats: Arc<LinkStats>,
        tasks: Vec<JoinHandle<()>>,
        udp_addr: Option<SocketAddr>,
        epoch: u64,
    ) -> Result<bool, TransportError> {
        let peer = remote.node_id;
        if peer == self.local_id() {
            for task in tasks {
                task.abort();
            }
            return Err(TransportError::HandshakeFailed("peer announced our own id".into()));
        }

        let mut announce = false;
        let mut dropped_link: Option<Link> = None;
        let mut evicted: Option<(NodeId, Link)> = None;
        {
            let mut links = self.links.write();
            if let Some(existing) = links.get(&peer) {
                let keep_existing = if existing.initiator == initiator {
                    // Same direction: a reconnect; the fresh link wins.
                    false
                } else {
                    // True collision: the smaller id keeps its outbound.
                    let surviving_initiator = self.local_id() < peer;
                    existing.initiator == surviving_initiator
                };

                if keep_existing {
                    debug!(peer = %peer, "Dial collision: existing link survives");
                    for task in tasks {
                        task.abort();
                    }
                    return Ok(false);
                }

                let old = links.remove(&peer).expect("checked above");
                let announced = old.announced;
                dropped_link = Some(old);
                links.insert(
                    peer,
                    Link {
                        sender,
                        initiator,
                        epoch,
                        announced,
                        stats,
                        tasks,
                        udp_addr,
                    },
                );
                announce = !announced;
                if announce {
                    links.get_mut(&peer).expect("just inserted").announced = true;
                }
            } else {
                if links.len() >= self.config.max_connections {
                    let victim = links
                        .iter()
                        .filter(|(_, l)| l.stats.opened_at.elapsed() >= self.config.eviction_grace)
                        .min_by_key(|(_, l)| *l.stats.last_activity.lock())
                        .map(|(id, _)| *id);
                    match victim {
                        Some(victim_id) => {
                            let old = links.remove(&victim_id).expect("victim present");
                            warn!(evicted = %victim_id, "Connection cap reached; evicting least active link");
                            evicted = Some((victim_id, old));
                        }
                        None => {
                            for task in tasks {
                                task.abort();
                            }
                            return Err(TransportError::Refused(
                                "connection cap reached; all links within grace".into(),
                            ));
                        }
                    }
                }
                links.insert(
                    peer,
                    Link {
                        sender,
                        initiator,
                        epoch,
                        announced: true,
                        stats,
                        tasks,
                        udp_addr,
                    },
                );
                announce = true;
            }
        }

        if let Some(old) = dropped_link {
            self.teardown_link(old, None);
        }
        if let Some((victim_id, old)) = evicted {
            self.teardown_link(old, Some(victim_id));
        }
        if announce {
            info!(peer = %peer, initiator, "Peer connected");
            self.bus.publish(PeerEvent::Connected {
                peer,
                initiator,
                metadata: remote.metadata.clone(),
            });
        }
        self.metrics.peers_connected(self.links.read().len());
        Ok(true)
    }

    /// Abort a link's tasks; when `announced_peer` is set, surface the
    /// disconnect.
    fn teardown_link(&self, link: Link, announced_peer: Option<NodeId>) {
        for task in &link.tasks {
            task.abort();
        }
        if let Some(peer) = announced_peer {
            if link.announced {
                self.bus.publish(PeerEvent::Disconnected { peer });
            }
            if let Some(addr) = link.udp_addr {
                if let Some(dg) = self.datagram.read().as_ref() {
                    dg.forget_addr(&addr);
                }
            }
        }
    }

    /// Remove a link if its epoch still matches (reader/writer death,
    /// keep-alive expiry, explicit disconnect).
    pub(crate) fn cleanup_link(&self, peer: NodeId, epoch: Option<u64>) {
        let removed = {
            let mut links = self.links.write();
            match links.get(&peer) {
                Some(link) if epoch.map_or(true, |e| link.epoch == e) => links.remove(&peer),
                _ => None,
            }
        };
        if let Some(link) = removed {
            info!(peer = %peer, "Peer disconnected");
            self.teardown_link(link, Some(peer));
            self.metrics.peers_connected(self.links.read().len());
        }
    }

    /// Account an inbound frame, answer transport-internal keep-alive,
    /// and forward everything else onto the bus.
    pub(crate) fn handle_inbound(self: &Arc<Self>, peer: NodeId, frame: Frame) {
        let stats = match self.links.read().get(&peer) {
            Some(link) => link.stats.clone(),
            None => return,
        };
        *stats.last_activity.lock() = Instant::now();
        stats.frames_in.fetch_add(1, Ordering::Relaxed);
        stats.missed_keepalives.store(0, Ordering::Relaxed);

        match &frame {
            Frame::Pong { request_id, .. } if request_id.starts_with(KEEPALIVE_PREFIX) => {
                let mut pending = stats.pending_ping.lock();
                if let Some((expected, sent)) = pending.take() {
                    if expected == *request_id {
                        let rtt = sent.elapsed();
                        stats.rtt_ms.store(rtt.as_millis() as u64, Ordering::Relaxed);
                        self.metrics.rtt_observed(rtt.as_secs_f64());
                    } else {
                        *pending = Some((expected, sent));
                    }
                }
            }
            Frame::Ping { request_id } if request_id.starts_with(KEEPALIVE_PREFIX) => {
                let pong = Frame::Pong {
                    request_id: request_id.clone(),
                    ts: shared_types::Timestamp::now().as_secs(),
                };
                let _ = self.send_to_peer(peer, pong);
            }
            _ => {
                self.bus.publish(PeerEvent::Frame { peer, frame });
            }
        }
    }

    /// Attach a late-spawned task (the stream reader) to a live link.
    pub(crate) fn attach_task(&self, peer: NodeId, epoch: u64, task: JoinHandle<()>) {
        let mut links = self.links.write();
        match links.get_mut(&peer) {
            Some(link) if link.epoch == epoch => link.tasks.push(task),
            _ => task.abort(),
        }
    }

    /// Enqueue a frame to a peer's writer mailbox.
    pub(crate) fn send_to_peer(self: &Arc<Self>, peer: NodeId, frame: Frame) -> Result<(), TransportError> {
        let (sender, stats) = match self.links.read().get(&peer) {
            Some(link) => (link.sender.clone(), link.stats.clone()),
            None => return Err(TransportError::NotConnected(peer.to_hex())),
        };
        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                stats.drops.fetch_add(1, Ordering::Relaxed);
                self.metrics.backpressure_drop();
                self.bus.publish(PeerEvent::BackpressureDropped { peer });
                Err(TransportError::BackpressureDropped(peer.to_hex()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportError::NotConnected(peer.to_hex()))
            }
        }
    }
}

/// The transport facade the node wires everything through.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        hello: LocalHello,
        config: TransportConfig,
        bus: Arc<InMemoryEventBus>,
        metrics: SafeMetrics,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            hello: RwLock::new(hello),
            config,
            bus,
            metrics,
            links: RwLock::new(HashMap::new()),
            backgrounded: AtomicBool::new(false),
            epoch_counter: AtomicU64::new(1),
            datagram: RwLock::new(None),
            service_tasks: Mutex::new(Vec::new()),
        });

        let manager = Self { inner };
        manager.spawn_keepalive();
        manager
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.local_id()
    }

    /// Current HELLO announcement (protocol version, metadata).
    pub fn local_hello(&self) -> LocalHello {
        self.inner.hello.read().clone()
    }

    /// Mutate the announced metadata (e.g. tab visibility changes).
    pub fn update_metadata(&self, f: impl FnOnce(&mut PeerMetadata)) {
        let mut hello = self.inner.hello.write();
        f(&mut hello.metadata);
    }

    /// Switch keep-alive cadence for a backgrounded session.
    pub fn set_backgrounded(&self, backgrounded: bool) {
        self.inner.backgrounded.store(backgrounded, Ordering::Relaxed);
        self.update_metadata(|m| {
            if m.tab_visible.is_some() {
                m.tab_visible = Some(!backgrounded);
            }
        });
    }

    /// Start the TCP listener. Returns the bound address.
    pub async fn listen(&self, addr: &str) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        info!(%bound, "Stream transport listening");

        let inner = self.inner.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (mut socket, remote_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    let local = inner.hello.read().clone();
                    let timeout = inner.config.connect_timeout;
                    match stream::inbound_handshake(&mut socket, &local, timeout).await {
                        Ok(remote) => {
                            let _ = spawn_stream_link(&inner, socket, &remote, false);
                        }
                        Err(e) => {
                            debug!(%remote_addr, error = %e, "Inbound handshake failed");
                        }
                    }
                });
            }
        });
        self.inner.service_tasks.lock().push(accept_task);
        Ok(bound)
    }

    /// Dial a peer's published stream address.
    pub async fn connect(&self, addr: &str) -> Result<NodeId, TransportError> {
        let local = self.inner.hello.read().clone();
        let timeout = self.inner.config.connect_timeout;
        let mut socket = stream::dial(addr, timeout).await?;
        let remote = stream::outbound_handshake(&mut socket, &local, timeout).await?;
        let peer = remote.node_id;
        spawn_stream_link(&self.inner, socket, &remote, true)?;
        Ok(peer)
    }

    /// Dial and verify the peer is who we expected.
    pub async fn connect_expect(
        &self,
        addr: &str,
        expected: NodeId,
    ) -> Result<NodeId, TransportError> {
        let peer = self.connect(addr).await?;
        if peer != expected {
            self.disconnect(&peer);
            return Err(TransportError::HandshakeFailed(format!(
                "dialed {expected}, reached {peer}"
            )));
        }
        Ok(peer)
    }

    /// Enable the datagram transport. Returns the bound UDP address.
    pub async fn enable_datagram(&self, bind_addr: &str) -> std::io::Result<SocketAddr> {
        crate::datagram::enable(&self.inner, bind_addr).await
    }

    /// Local datagram address, when the endpoint is enabled.
    pub fn datagram_addr(&self) -> Option<SocketAddr> {
        self.inner.datagram.read().as_ref().map(|d| d.local_addr())
    }

    /// Open a datagram peer channel toward `addr` (learned through the
    /// opaque signalling exchange).
    pub async fn connect_datagram(&self, addr: SocketAddr) -> Result<NodeId, TransportError> {
        crate::datagram::connect(&self.inner, addr).await
    }

    /// Send a frame to a connected peer.
    pub fn send(&self, peer: NodeId, frame: Frame) -> Result<(), TransportError> {
        self.inner.send_to_peer(peer, frame)
    }

    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.inner.links.read().contains_key(peer)
    }

    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.inner.links.read().keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.links.read().len()
    }

    /// Stats handle for one link.
    pub fn link_stats(&self, peer: &NodeId) -> Option<Arc<LinkStats>> {
        self.inner.links.read().get(peer).map(|l| l.stats.clone())
    }

    /// Tear down the link to `peer`.
    pub fn disconnect(&self, peer: &NodeId) {
        self.inner.cleanup_link(*peer, None);
    }

    /// Stop service tasks and drop every link.
    pub fn shutdown(&self) {
        for task in self.inner.service_tasks.lock().drain(..) {
            task.abort();
        }
        let peers = self.connected_peers();
        for peer in peers {
            self.inner.cleanup_link(peer, None);
        }
    }

    fn spawn_keepalive(&self) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let tick = (inner.config.keepalive_interval / 4)
                .max(std::time::Duration::from_millis(50));
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                keepalive_sweep(&inner);
            }
        });
        self.inner.service_tasks.lock().push(task);
    }
}

/// One keep-alive pass over every link.
fn keepalive_sweep(inner: &Arc<ManagerInner>) {
    let interval = if inner.backgrounded.load(Ordering::Relaxed) {
        inner.config.keepalive_relaxed_interval
    } else {
        inner.config.keepalive_interval
    };

    let snapshot: Vec<(NodeId, u64, Arc<LinkStats>)> = inner
        .links
        .read()
        .iter()
        .map(|(id, link)| (*id, link.epoch, link.stats.clone()))
        .collect();

    for (peer, epoch, stats) in snapshot {
        // Expire an unanswered probe.
        {
            let mut pending = stats.pending_ping.lock();
            if let Some((_, sent)) = &*pending {
                if sent.elapsed() >= interval {
                    *pending = None;
                    stats.missed_keepalives.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if stats.missed_keepalives.load(Ordering::Relaxed) >= inner.config.keepalive_miss_cap {
            warn!(peer = %peer, "Keep-alive expired; disconnecting");
            inner.cleanup_link(peer, Some(epoch));
            continue;
        }

        let due = stats
            .last_ping_sent
            .lock()
            .map_or(true, |sent| sent.elapsed() >= interval);
        if due && stats.pending_ping.lock().is_none() {
            let request_id = format!("{KEEPALIVE_PREFIX}{}", Uuid::new_v4());
            let frame = Frame::Ping {
                request_id: request_id.clone(),
            };
            if inner.send_to_peer(peer, frame).is_ok() {
                let now = Instant::now();
                *stats.pending_ping.lock() = Some((request_id, now));
                *stats.last_ping_sent.lock() = Some(now);
            }
        }
    }
}

/// Register a handshaken TCP stream and spawn its tasks.
///
/// The link is registered before the reader starts so the peer's very
/// first frame always finds an installed link.
fn spawn_stream_link(
    inner: &Arc<ManagerInner>,
    socket: tokio::net::TcpStream,
    remote: &RemoteHello,
    initiator: bool,
) -> Result<bool, TransportError> {
    let peer = remote.node_id;
    let epoch = inner.next_epoch();
    let stats = Arc::new(LinkStats::new());
    let (tx, mut rx) = mpsc::channel::<Frame>(inner.config.send_buffer_frames);
    let (mut read_half, mut write_half) = socket.into_split();

    let writer_inner = inner.clone();
    let writer_stats = stats.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                debug!(peer = %peer, error = %e, "Stream write failed");
                break;
            }
            writer_stats.frames_out.fetch_add(1, Ordering::Relaxed);
        }
        writer_inner.cleanup_link(peer, Some(epoch));
    });

    if !inner.register_link(remote, initiator, tx, stats, vec![writer], None, epoch)? {
        return Ok(false);
    }

    let reader_inner = inner.clone();
    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => reader_inner.handle_inbound(peer, frame),
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Stream read failed");
                    break;
                }
            }
        }
        reader_inner.cleanup_link(peer, Some(epoch));
    });
    inner.attach_task(peer, epoch, reader);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use shared_bus::EventFilter;

    fn hello(b: u8) -> LocalHello {
        LocalHello {
            node_id: NodeId::from_bytes([b; 20]),
            protocol_version: "1.2.0".into(),
            build_id: "dev".into(),
            metadata: PeerMetadata::server("127.0.0.1:0"),
        }
    }

    fn manager(b: u8) -> (ConnectionManager, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let manager = ConnectionManager::new(
            hello(b),
            TransportConfig::for_testing(),
            bus.clone(),
            SafeMetrics::disabled(),
        );
        (manager, bus)
    }

    #[tokio::test]
    async fn connect_and_exchange_frames() {
        let (a, bus_a) = manager(1);
        let (b, bus_b) = manager(2);
        let mut events_b = bus_b.subscribe(EventFilter::frames());
        let mut lifecycle_a = bus_a.subscribe(EventFilter::lifecycle());

        let addr = b.listen("127.0.0.1:0").await.unwrap();
        let peer = a.connect(&addr.to_string()).await.unwrap();
        assert_eq!(peer, b.local_id());
        assert!(a.is_connected(&peer));

        match lifecycle_a.recv().await.unwrap() {
            PeerEvent::Connected { peer: p, initiator, .. } => {
                assert_eq!(p, b.local_id());
                assert!(initiator);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        a.send(
            peer,
            Frame::Ping {
                request_id: "rpc-1".into(),
            },
        )
        .unwrap();

        match events_b.recv().await.unwrap() {
            PeerEvent::Frame { peer: from, frame } => {
                assert_eq!(from, a.local_id());
                assert_eq!(
                    frame,
                    Frame::Ping {
                        request_id: "rpc-1".into()
                    }
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn version_mismatch_refuses_link() {
        let (a, _) = manager(1);
        let bus = Arc::new(InMemoryEventBus::new());
        let mut incompatible_hello = hello(2);
        incompatible_hello.protocol_version = "2.0.0".into();
        let b = ConnectionManager::new(
            incompatible_hello,
            TransportConfig::for_testing(),
            bus,
            SafeMetrics::disabled(),
        );

        let addr = b.listen("127.0.0.1:0").await.unwrap();
        let result = a.connect(&addr.to_string()).await;
        assert!(matches!(
            result,
            Err(TransportError::VersionIncompatible { .. })
        ));
        assert_eq!(a.connection_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_surfaces_event_on_remote() {
        let (a, _) = manager(1);
        let (b, bus_b) = manager(2);
        let mut lifecycle_b = bus_b.subscribe(EventFilter::lifecycle());

        let addr = b.listen("127.0.0.1:0").await.unwrap();
        let peer = a.connect(&addr.to_string()).await.unwrap();

        // B sees the connect...
        assert!(matches!(
            lifecycle_b.recv().await.unwrap(),
            PeerEvent::Connected { .. }
        ));

        // ...and the disconnect after A drops the link.
        a.disconnect(&peer);
        assert!(matches!(
            lifecycle_b.recv().await.unwrap(),
            PeerEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn keepalive_keeps_idle_link_up() {
        let (a, _) = manager(1);
        let (b, _) = manager(2);
        let addr = b.listen("127.0.0.1:0").await.unwrap();
        let peer = a.connect(&addr.to_string()).await.unwrap();

        // Several keep-alive intervals pass; the link must survive on
        // probes alone.
        tokio::time::sleep(std::time::Duration::from_millis(900)).await;
        assert!(a.is_connected(&peer));
        assert!(b.is_connected(&a.local_id()));

        let stats = a.link_stats(&peer).unwrap();
        assert!(stats.frames_out() > 0);
    }

    #[tokio::test]
    async fn backpressure_drops_and_reports() {
        let (a, bus_a) = manager(1);
        let (b, _) = manager(2);
        let mut pressure = bus_a.subscribe(shared_bus::EventFilter {
            topics: vec![shared_bus::EventTopic::Pressure],
            peer: None,
        });

        let addr = b.listen("127.0.0.1:0").await.unwrap();
        let peer = a.connect(&addr.to_string()).await.unwrap();

        // Flood far past the buffer; the writer cannot drain a closed
        // remote faster than we fill.
        let mut dropped = false;
        for i in 0..10_000 {
            let frame = Frame::Ping {
                request_id: format!("flood-{i}"),
            };
            if a.send(peer, frame).is_err() {
                dropped = true;
                break;
            }
        }
        assert!(dropped, "expected a backpressure drop");
        assert!(matches!(
            pressure.recv().await.unwrap(),
            PeerEvent::BackpressureDropped { .. }
        ));
    }
}
