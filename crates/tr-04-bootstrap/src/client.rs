//! The node-side bootstrap client.
//!
//! One persistent link to the coordinator: register behind the version
//! gate, ask for peers or genesis, relay opaque signalling, and — when
//! this node is a bridge — answer onboarding queries for NAT-restricted
//! joiners.

use crate::errors::BootstrapError;
use parking_lot::Mutex;
use rand::Rng;
use shared_types::{
    BootstrapStatus, Frame, MembershipToken, NodeId, PeerDescriptor, PeerMetadata, Timestamp,
    PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tr_02_transport::framing::{read_frame, write_frame};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Budget for the register exchange.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for a peers-or-genesis exchange (covers the coordinator's
/// bridge relay window).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// What this node announces to the coordinator.
#[derive(Debug, Clone)]
pub struct Registration {
    pub node_id: NodeId,
    pub protocol_version: String,
    pub build_id: String,
    pub metadata: PeerMetadata,
}

impl Registration {
    pub fn new(node_id: NodeId, build_id: impl Into<String>, metadata: PeerMetadata) -> Self {
        Self {
            node_id,
            protocol_version: PROTOCOL_VERSION.to_string(),
            build_id: build_id.into(),
            metadata,
        }
    }
}

/// The coordinator's onboarding decision.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinDirective {
    /// This node is the first member; hold the genesis token.
    Genesis(MembershipToken),
    /// Connect to the named member directly.
    Helper {
        peer: PeerDescriptor,
        token: Option<MembershipToken>,
        peers: Vec<PeerDescriptor>,
    },
    /// No bridge was available; flagged referrals only.
    EmergencyPeers {
        peers: Vec<PeerDescriptor>,
        message: Option<String>,
    },
    /// Nothing to join yet.
    NetworkEmpty,
}

/// Unsolicited traffic from the coordinator link.
#[derive(Debug, Clone)]
pub enum BootstrapEvent {
    /// An opaque signalling payload relayed to us.
    Signal {
        from: NodeId,
        payload: serde_json::Value,
    },
    /// Bridge duty: pick an onboarding member for a joiner.
    OnboardingRequest {
        request_id: String,
        new_node_id: NodeId,
        metadata: PeerMetadata,
    },
    /// The coordinator link dropped.
    Disconnected,
}

struct ClientInner {
    registration: Registration,
    outbox: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    register_waiter: Mutex<Option<oneshot::Sender<Result<(), BootstrapError>>>>,
    events: mpsc::Sender<BootstrapEvent>,
    connected: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Client handle for the coordinator link.
#[derive(Clone)]
pub struct BootstrapClient {
    inner: Arc<ClientInner>,
}

impl BootstrapClient {
    /// Open the coordinator link.
    pub async fn connect(
        addr: &str,
        registration: Registration,
    ) -> Result<(Self, mpsc::Receiver<BootstrapEvent>), BootstrapError> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(|e| BootstrapError::Unreachable(format!("{addr}: {e}")))?;
        let (mut reader, mut writer) = socket.into_split();
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(64);
        let (events_tx, events_rx) = mpsc::channel(64);

        let inner = Arc::new(ClientInner {
            registration,
            outbox: outbox_tx,
            pending: Mutex::new(HashMap::new()),
            register_waiter: Mutex::new(None),
            events: events_tx,
            connected: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbox_rx.recv().await {
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_inner = inner.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => reader_inner.handle_frame(frame),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Coordinator link read failed");
                        break;
                    }
                }
            }
            reader_inner.connected.store(false, Ordering::Relaxed);
            let _ = reader_inner.events.try_send(BootstrapEvent::Disconnected);
        });

        inner.tasks.lock().push(writer_task);
        inner.tasks.lock().push(reader_task);

        Ok((Self { inner }, events_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Register this node. Fatal on a version rejection.
    pub async fn register(&self) -> Result<(), BootstrapError> {
        let (tx, rx) = oneshot::channel();
        *self.inner.register_waiter.lock() = Some(tx);

        let r = &self.inner.registration;
        self.inner
            .send(Frame::Register {
                node_id: r.node_id,
                protocol_version: r.protocol_version.clone(),
                build_id: r.build_id.clone(),
                timestamp: Timestamp::now().as_secs(),
                metadata: r.metadata.clone(),
            })
            .await?;

        match timeout(REGISTER_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BootstrapError::ConnectionClosed),
            Err(_) => Err(BootstrapError::Timeout),
        }
    }

    /// Ask the coordinator for peers or a genesis grant.
    pub async fn request_peers(&self, max_peers: usize) -> Result<JoinDirective, BootstrapError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(request_id.clone(), tx);

        let r = &self.inner.registration;
        if let Err(e) = self
            .inner
            .send(Frame::GetPeersOrGenesis {
                request_id: request_id.clone(),
                node_id: r.node_id,
                max_peers,
                metadata: r.metadata.clone(),
            })
            .await
        {
            self.inner.pending.lock().remove(&request_id);
            return Err(e);
        }

        let reply = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(BootstrapError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().remove(&request_id);
                return Err(BootstrapError::Timeout);
            }
        };

        directive_from_response(reply)
    }

    /// Relay an opaque signalling payload through the coordinator.
    pub async fn send_signal(
        &self,
        to: NodeId,
        payload: serde_json::Value,
    ) -> Result<(), BootstrapError> {
        self.inner
            .send(Frame::Signal {
                from: self.inner.registration.node_id,
                to,
                payload,
            })
            .await
    }

    /// Present the bridge backchannel secret.
    pub async fn authenticate_bridge(
        &self,
        secret: &str,
        bootstrap_server: &str,
    ) -> Result<(), BootstrapError> {
        self.inner
            .send(Frame::BootstrapAuth {
                auth_token: secret.to_string(),
                bootstrap_server: bootstrap_server.to_string(),
            })
            .await
    }

    /// Bridge duty: answer an onboarding query.
    pub async fn respond_onboarding(
        &self,
        request_id: String,
        peer: PeerDescriptor,
        membership_token: Option<MembershipToken>,
    ) -> Result<(), BootstrapError> {
        self.inner
            .send(Frame::OnboardingPeerResponse {
                request_id,
                data: shared_types::OnboardingPeerData {
                    peer,
                    membership_token,
                },
            })
            .await
    }

    /// Close the link.
    pub fn shutdown(&self) {
        self.inner.connected.store(false, Ordering::Relaxed);
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Full join helper: connect, register, and request peers, with
    /// jittered exponential backoff across attempts. A version
    /// rejection aborts immediately.
    pub async fn join_with_backoff(
        addr: &str,
        registration: Registration,
        max_peers: usize,
        max_attempts: u32,
    ) -> Result<(Self, mpsc::Receiver<BootstrapEvent>, JoinDirective), BootstrapError> {
        let mut last_error = BootstrapError::Timeout;
        for attempt in 0..max_attempts {
            if attempt > 0 {
                let backoff = backoff_delay(attempt);
                debug!(attempt, ?backoff, "Bootstrap join retry");
                tokio::time::sleep(backoff).await;
            }

            match Self::connect(addr, registration.clone()).await {
                Ok((client, events)) => {
                    match client.register().await {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            client.shutdown();
                            last_error = e;
                            continue;
                        }
                    }
                    match client.request_peers(max_peers).await {
                        Ok(directive) => {
                            info!(?directive, "Bootstrap join complete");
                            return Ok((client, events, directive));
                        }
                        Err(e) => {
                            client.shutdown();
                            last_error = e;
                        }
                    }
                }
                Err(e) => last_error = e,
            }
        }
        warn!(error = %last_error, "Bootstrap join gave up");
        Err(last_error)
    }
}

impl ClientInner {
    async fn send(&self, frame: Frame) -> Result<(), BootstrapError> {
        self.outbox
            .send(frame)
            .await
            .map_err(|_| BootstrapError::ConnectionClosed)
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Registered { .. } => {
                if let Some(waiter) = self.register_waiter.lock().take() {
                    let _ = waiter.send(Ok(()));
                }
            }
            Frame::VersionMismatch {
                client_version,
                server_version,
                ..
            } => {
                let error = BootstrapError::VersionRejected {
                    client: client_version,
                    server: server_version,
                };
                if let Some(waiter) = self.register_waiter.lock().take() {
                    let _ = waiter.send(Err(error));
                }
            }
            Frame::Response { ref request_id, .. } => {
                let waiter = self.pending.lock().remove(request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(frame);
                    }
                    None => debug!(%request_id, "Unsolicited bootstrap response"),
                }
            }
            Frame::Signal { from, payload, .. } => {
                let _ = self.events.try_send(BootstrapEvent::Signal { from, payload });
            }
            Frame::GetOnboardingPeer {
                request_id,
                new_node_id,
                new_node_metadata,
            } => {
                let _ = self.events.try_send(BootstrapEvent::OnboardingRequest {
                    request_id,
                    new_node_id,
                    metadata: new_node_metadata,
                });
            }
            other => {
                debug!(frame = ?other, "Ignoring frame outside the bootstrap vocabulary");
            }
        }
    }
}

/// Map a coordinator response onto the typed directive.
fn directive_from_response(frame: Frame) -> Result<JoinDirective, BootstrapError> {
    let Frame::Response { success, data, .. } = frame else {
        return Err(BootstrapError::Protocol("expected response frame".into()));
    };
    if !success {
        return Err(BootstrapError::Protocol(
            data.message.unwrap_or_else(|| "coordinator refused".into()),
        ));
    }

    match data.status {
        BootstrapStatus::Genesis => data
            .membership_token
            .map(JoinDirective::Genesis)
            .ok_or_else(|| BootstrapError::Protocol("genesis without token".into())),
        BootstrapStatus::HelperCoordinating => {
            let peer = data
                .onboarding_helper
                .ok_or_else(|| BootstrapError::Protocol("helper response without helper".into()))?;
            Ok(JoinDirective::Helper {
                peer,
                token: data.membership_token,
                peers: data.peers,
            })
        }
        BootstrapStatus::EmergencyBridgeRouting => Ok(JoinDirective::EmergencyPeers {
            peers: data.peers,
            message: data.message,
        }),
        BootstrapStatus::NetworkEmpty => Ok(JoinDirective::NetworkEmpty),
    }
}

/// Jittered exponential backoff: 500 ms base, doubled per attempt,
/// ±25 %.
fn backoff_delay(attempt: u32) -> Duration {
    let base = 500.0 * f64::from(1u32 << (attempt - 1).min(6));
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((base * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_mapping_covers_all_statuses() {
        let empty = Frame::Response {
            request_id: "r".into(),
            success: true,
            data: shared_types::BootstrapResponseData {
                status: BootstrapStatus::NetworkEmpty,
                ..Default::default()
            },
        };
        assert_eq!(
            directive_from_response(empty).unwrap(),
            JoinDirective::NetworkEmpty
        );

        let genesis_missing_token = Frame::Response {
            request_id: "r".into(),
            success: true,
            data: shared_types::BootstrapResponseData {
                status: BootstrapStatus::Genesis,
                ..Default::default()
            },
        };
        assert!(directive_from_response(genesis_missing_token).is_err());
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_delay(1);
        let fourth = backoff_delay(4);
        assert!(first >= Duration::from_millis(375));
        assert!(fourth >= Duration::from_millis(3000));
    }
}
