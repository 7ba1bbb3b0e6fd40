//! UDP datagram peer transport.
//!
//! NAT-restricted participants cannot publish a listening address; they
//! reach each other over peer channels set up by an opaque signalling
//! exchange (offer/answer payloads relayed by the bootstrap link or an
//! existing DHT peer). Once both sides know a reachable socket address,
//! the channel itself is plain UDP carrying one JSON frame per
//! datagram, HELLO-gated exactly like the stream transport.
//!
//! One socket serves every datagram peer; a single receive loop
//! dispatches by source address.

use crate::errors::TransportError;
use crate::framing::{decode_datagram, encode_datagram};
use crate::hello::{gate_hello, RemoteHello};
use crate::manager::{LinkStats, ManagerInner};
use parking_lot::Mutex;
use shared_types::{Frame, NodeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Largest accepted datagram.
const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

/// Shared state of the datagram endpoint.
pub(crate) struct DatagramState {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    /// Source address -> registered peer.
    peers_by_addr: Mutex<HashMap<SocketAddr, NodeId>>,
    /// Outstanding dials awaiting the remote HELLO.
    pending_dials: Mutex<HashMap<SocketAddr, oneshot::Sender<Frame>>>,
}

impl DatagramState {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn forget_addr(&self, addr: &SocketAddr) {
        self.peers_by_addr.lock().remove(addr);
    }
}

/// Bind the UDP socket and start the receive loop.
pub(crate) async fn enable(
    inner: &Arc<ManagerInner>,
    bind_addr: &str,
) -> std::io::Result<SocketAddr> {
    let socket = UdpSocket::bind(bind_addr).await?;
    let local_addr = socket.local_addr()?;
    let state = Arc::new(DatagramState {
        socket: Arc::new(socket),
        local_addr,
        peers_by_addr: Mutex::new(HashMap::new()),
        pending_dials: Mutex::new(HashMap::new()),
    });
    *inner.datagram.write() = Some(state.clone());

    let recv_inner = inner.clone();
    let task = tokio::spawn(async move {
        let mut buffer = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            let (len, from) = match state.socket.recv_from(&mut buffer).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Datagram receive failed");
                    continue;
                }
            };
            let frame = match decode_datagram(&buffer[..len]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(%from, error = %e, "Dropping undecodable datagram");
                    continue;
                }
            };
            dispatch(&recv_inner, &state, from, frame);
        }
    });
    inner.service_tasks.lock().push(task);

    debug!(%local_addr, "Datagram transport enabled");
    Ok(local_addr)
}

/// Route one received datagram.
fn dispatch(inner: &Arc<ManagerInner>, state: &Arc<DatagramState>, from: SocketAddr, frame: Frame) {
    // A dial in flight toward this address takes the frame.
    if let Some(waiter) = state.pending_dials.lock().remove(&from) {
        let _ = waiter.send(frame);
        return;
    }

    // Known peer: normal inbound handling.
    let known = state.peers_by_addr.lock().get(&from).copied();
    if let Some(peer) = known {
        inner.handle_inbound(peer, frame);
        return;
    }

    // Unknown address: only a HELLO opens a channel.
    if let Frame::Hello { .. } = frame {
        let local = inner.hello.read().clone();
        match gate_hello(&local, frame) {
            Ok(remote) => {
                // Answer the HELLO, then register the link.
                let reply = local.to_frame();
                if let Ok(bytes) = encode_datagram(&reply) {
                    let socket = state.socket.clone();
                    let send_state = state.clone();
                    let send_inner = inner.clone();
                    tokio::spawn(async move {
                        let _ = socket.send_to(&bytes, from).await;
                        let _ = register_datagram_link(&send_inner, &send_state, &remote, from, false);
                    });
                }
            }
            Err(e) => {
                debug!(%from, error = %e, "Datagram HELLO gated out");
            }
        }
    } else {
        debug!(%from, "Dropping datagram from unknown address");
    }
}

/// Dial a datagram peer: send HELLO, await the gated reply.
pub(crate) async fn connect(
    inner: &Arc<ManagerInner>,
    addr: SocketAddr,
) -> Result<NodeId, TransportError> {
    let state = inner
        .datagram
        .read()
        .clone()
        .ok_or_else(|| TransportError::Unreachable("datagram transport not enabled".into()))?;

    // A simultaneous dial from the other side may have opened this
    // channel already.
    if let Some(peer) = state.peers_by_addr.lock().get(&addr).copied() {
        return Ok(peer);
    }

    let local = inner.hello.read().clone();
    let (tx, rx) = oneshot::channel();
    state.pending_dials.lock().insert(addr, tx);

    let bytes = encode_datagram(&local.to_frame())?;
    state
        .socket
        .send_to(&bytes, addr)
        .await
        .map_err(|e| TransportError::Unreachable(format!("{addr}: {e}")))?;

    let reply = match timeout(inner.config.connect_timeout, rx).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(_)) => {
            return Err(TransportError::Unreachable("datagram endpoint closed".into()));
        }
        Err(_) => {
            state.pending_dials.lock().remove(&addr);
            return Err(TransportError::Timeout(addr.to_string()));
        }
    };

    let remote = gate_hello(&local, reply)?;
    let peer = remote.node_id;
    register_datagram_link(inner, &state, &remote, addr, true)?;
    Ok(peer)
}

/// Build the writer task and register a datagram link.
fn register_datagram_link(
    inner: &Arc<ManagerInner>,
    state: &Arc<DatagramState>,
    remote: &RemoteHello,
    addr: SocketAddr,
    initiator: bool,
) -> Result<bool, TransportError> {
    let peer = remote.node_id;
    let epoch = inner.next_epoch();
    let stats = Arc::new(LinkStats::new());
    let (tx, mut rx) = mpsc::channel::<Frame>(inner.config.send_buffer_frames);

    let socket = state.socket.clone();
    let writer_inner = inner.clone();
    let writer_stats = stats.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let bytes = match encode_datagram(&frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Dropping unencodable frame");
                    continue;
                }
            };
            if let Err(e) = socket.send_to(&bytes, addr).await {
                debug!(peer = %peer, error = %e, "Datagram send failed");
                break;
            }
            writer_stats
                .frames_out
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        writer_inner.cleanup_link(peer, Some(epoch));
    });

    let kept = inner.register_link(remote, initiator, tx, stats, vec![writer], Some(addr), epoch)?;
    if kept {
        state.peers_by_addr.lock().insert(addr, peer);
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::hello::LocalHello;
    use crate::manager::ConnectionManager;
    use shared_bus::{EventFilter, InMemoryEventBus, PeerEvent};
    use shared_types::PeerMetadata;
    use trellis_telemetry::SafeMetrics;

    fn manager(b: u8) -> (ConnectionManager, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let hello = LocalHello {
            node_id: NodeId::from_bytes([b; 20]),
            protocol_version: "1.2.0".into(),
            build_id: "dev".into(),
            metadata: PeerMetadata::client(),
        };
        let manager = ConnectionManager::new(
            hello,
            TransportConfig::for_testing(),
            bus.clone(),
            SafeMetrics::disabled(),
        );
        (manager, bus)
    }

    #[tokio::test]
    async fn datagram_channel_connects_and_delivers() {
        let (a, _) = manager(1);
        let (b, bus_b) = manager(2);
        let mut frames_b = bus_b.subscribe(EventFilter::frames());

        a.enable_datagram("127.0.0.1:0").await.unwrap();
        let b_addr = b.enable_datagram("127.0.0.1:0").await.unwrap();

        let peer = a.connect_datagram(b_addr).await.unwrap();
        assert_eq!(peer, b.local_id());
        assert!(a.is_connected(&peer));

        a.send(
            peer,
            Frame::Ping {
                request_id: "dg-1".into(),
            },
        )
        .unwrap();

        match frames_b.recv().await.unwrap() {
            PeerEvent::Frame { peer: from, frame } => {
                assert_eq!(from, a.local_id());
                assert_eq!(
                    frame,
                    Frame::Ping {
                        request_id: "dg-1".into()
                    }
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dial_without_endpoint_fails_cleanly() {
        let (a, _) = manager(3);
        let result = a.connect_datagram("127.0.0.1:9".parse().unwrap()).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }
}
