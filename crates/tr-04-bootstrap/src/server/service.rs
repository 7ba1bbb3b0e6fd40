//! Coordinator connection handling and onboarding policy.

use super::registry::{Participant, Registry};
use parking_lot::Mutex;
use shared_types::version::{build_ids_compatible, ProtocolVersion, BUILD_ID_FALLBACK};
use shared_types::{
    BootstrapResponseData, BootstrapStatus, Frame, NodeId, PeerMetadata, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tr_02_transport::framing::{read_frame, write_frame};
use tr_03_identity::{membership::issue_genesis_token_for, membership::issue_membership_token, NodeIdentity};
use tracing::{debug, info, warn};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Elect a genesis member for an empty DHT.
    pub create_dht: bool,
    /// TCP listen address for the bootstrap protocol.
    pub listen_addr: String,
    /// Optional HTTP address for `/health` and `/stats`.
    pub http_addr: Option<String>,
    /// Shared secret bridges must present on the backchannel. When
    /// set, unauthenticated bridges are not used for onboarding.
    pub bridge_secret: Option<String>,
    /// Advertised build id (advisory gate).
    pub build_id: String,
    /// How long to wait for a bridge's onboarding answer before the
    /// emergency fallback.
    pub bridge_reply_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            create_dht: false,
            listen_addr: "0.0.0.0:9470".into(),
            http_addr: None,
            bridge_secret: None,
            build_id: BUILD_ID_FALLBACK.into(),
            bridge_reply_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters exposed on `/stats`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub connected_clients: usize,
    pub bridge_nodes: usize,
    pub uptime: u64,
}

struct PendingOnboarding {
    requester: NodeId,
    original_request_id: String,
}

pub(crate) struct ServerInner {
    identity: NodeIdentity,
    config: ServerConfig,
    registry: Mutex<Registry>,
    /// Genesis is handed out at most once per process lifetime.
    genesis_issued: AtomicBool,
    pending_onboarding: Mutex<HashMap<String, PendingOnboarding>>,
    started_at: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The bootstrap coordinator.
#[derive(Clone)]
pub struct BootstrapServer {
    inner: Arc<ServerInner>,
}

impl BootstrapServer {
    pub fn new(identity: NodeIdentity, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                identity,
                config,
                registry: Mutex::new(Registry::new()),
                genesis_issued: AtomicBool::new(false),
                pending_onboarding: Mutex::new(HashMap::new()),
                started_at: Instant::now(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The coordinator's issuer id (nodes trust this for genesis and
    /// server-minted membership tokens).
    pub fn issuer_id(&self) -> NodeId {
        self.inner.identity.node_id()
    }

    /// Bind and serve. Returns the bound protocol address.
    pub async fn run(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.inner.config.listen_addr).await?;
        let bound = listener.local_addr()?;
        info!(%bound, create_dht = self.inner.config.create_dht, "Bootstrap coordinator listening");

        let inner = self.inner.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, remote)) => {
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            handle_connection(inner, socket, remote).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Bootstrap accept failed"),
                }
            }
        });
        self.inner.tasks.lock().push(accept_task);

        if let Some(http_addr) = self.inner.config.http_addr.clone() {
            let inner = self.inner.clone();
            let http_task = tokio::spawn(async move {
                if let Err(e) = super::http::serve_http_inner(inner, &http_addr).await {
                    warn!(error = %e, "HTTP surface failed");
                }
            });
            self.inner.tasks.lock().push(http_task);
        }

        Ok(bound)
    }

    /// Health counters.
    pub fn stats(&self) -> ServerStats {
        self.inner.stats()
    }

    /// Stop serving.
    pub fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub(crate) fn inner_arc(&self) -> Arc<ServerInner> {
        self.inner.clone()
    }
}

impl ServerInner {
    pub(crate) fn stats(&self) -> ServerStats {
        let registry = self.registry.lock();
        ServerStats {
            connected_clients: registry.len(),
            bridge_nodes: registry.bridge_count(),
            uptime: self.started_at.elapsed().as_secs(),
        }
    }

    fn now_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Serve one participant connection.
async fn handle_connection(inner: Arc<ServerInner>, socket: TcpStream, remote: SocketAddr) {
    debug!(%remote, "Bootstrap connection opened");
    let (mut reader, mut writer) = socket.into_split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if write_frame(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    });

    let mut registered: Option<NodeId> = None;
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!(%remote, error = %e, "Bootstrap read failed");
                break;
            }
        };

        match frame {
            Frame::Register {
                node_id,
                protocol_version,
                build_id,
                metadata,
                ..
            } => {
                if let Some(rejection) =
                    version_gate(&inner.config, &protocol_version, &build_id)
                {
                    warn!(node = %node_id, client = %protocol_version, "Version gate refused registration");
                    let _ = outbox_tx.send(rejection).await;
                    break;
                }
                inner.registry.lock().insert(Participant {
                    node_id,
                    metadata,
                    sender: outbox_tx.clone(),
                    registered_at: Instant::now(),
                    bridge_authed: false,
                });
                registered = Some(node_id);
                info!(node = %node_id, "Participant registered");
                let _ = outbox_tx.send(Frame::Registered { node_id }).await;
            }

            Frame::GetPeersOrGenesis {
                request_id,
                node_id,
                max_peers,
                metadata,
            } => {
                handle_get_peers(&inner, &outbox_tx, request_id, node_id, max_peers, metadata)
                    .await;
            }

            Frame::BootstrapAuth { auth_token, .. } => {
                let Some(node_id) = registered else { continue };
                let authed = match &inner.config.bridge_secret {
                    Some(secret) => {
                        secret.as_bytes().ct_eq(auth_token.as_bytes()).into()
                    }
                    None => true,
                };
                if let Some(participant) = inner.registry.lock().get_mut(&node_id) {
                    participant.bridge_authed = authed;
                }
                if !authed {
                    warn!(node = %node_id, "Bridge authentication failed");
                }
            }

            Frame::OnboardingPeerResponse { request_id, data } => {
                let pending = inner.pending_onboarding.lock().remove(&request_id);
                let Some(pending) = pending else {
                    debug!(%request_id, "Onboarding response with no pending entry");
                    continue;
                };
                let response = Frame::Response {
                    request_id: pending.original_request_id,
                    success: true,
                    data: BootstrapResponseData {
                        status: BootstrapStatus::HelperCoordinating,
                        peers: vec![data.peer.clone()],
                        onboarding_helper: Some(data.peer),
                        membership_token: data.membership_token,
                        ..Default::default()
                    },
                };
                send_to(&inner, &pending.requester, response);
            }

            Frame::Signal { from, to, payload } => {
                // Deliver unchanged; the payload is opaque here.
                send_to(&inner, &to, Frame::Signal { from, to, payload });
            }

            other => {
                debug!(%remote, frame = ?other, "Ignoring frame outside the bootstrap vocabulary");
            }
        }
    }

    if let Some(node_id) = registered {
        inner.registry.lock().remove(&node_id);
        info!(node = %node_id, "Participant departed");
    }
    writer_task.abort();
}

/// Protocol/build gate for a registration. `None` means pass.
fn version_gate(config: &ServerConfig, client_version: &str, client_build: &str) -> Option<Frame> {
    let server_version = ProtocolVersion::parse(PROTOCOL_VERSION).ok()?;
    let compatible = ProtocolVersion::parse(client_version)
        .map(|v| v.is_compatible_with(&server_version))
        .unwrap_or(false);
    let build_ok = build_ids_compatible(&config.build_id, client_build);

    if compatible && build_ok {
        return None;
    }
    Some(Frame::VersionMismatch {
        client_version: client_version.to_string(),
        server_version: PROTOCOL_VERSION.to_string(),
        client_build_id: client_build.to_string(),
        server_build_id: config.build_id.clone(),
        message: "protocol and build versions must match the network".into(),
    })
}

/// The onboarding policy: genesis, direct helper, or bridge relay.
async fn handle_get_peers(
    inner: &Arc<ServerInner>,
    outbox: &mpsc::Sender<Frame>,
    request_id: String,
    requester: NodeId,
    max_peers: usize,
    metadata: PeerMetadata,
) {
    let is_bridge = metadata.is_bridge_node;

    // 1. Genesis election: empty DHT, create mode, non-bridge joiner.
    if inner.config.create_dht && !is_bridge {
        let empty = inner
            .registry
            .lock()
            .dht_members_excluding(&requester)
            .is_empty();
        if empty && !inner.genesis_issued.swap(true, Ordering::SeqCst) {
            let token = issue_genesis_token_for(&inner.identity, requester, inner.now_secs());
            info!(node = %requester, "Genesis member elected");
            let _ = outbox
                .send(Frame::Response {
                    request_id,
                    success: true,
                    data: BootstrapResponseData {
                        status: BootstrapStatus::Genesis,
                        is_genesis: Some(true),
                        membership_token: Some(token),
                        ..Default::default()
                    },
                })
                .await;
            return;
        }
    }

    // 2. Directly reachable joiner: hand it the closest member.
    if metadata.is_directly_reachable() {
        let (helper, peers) = {
            let registry = inner.registry.lock();
            let helper = registry
                .closest_dht_member(&requester, &requester)
                .map(|p| p.descriptor());
            let peers: Vec<_> = registry
                .dht_members_excluding(&requester)
                .into_iter()
                .take(max_peers.max(1))
                .map(|p| p.descriptor())
                .collect();
            (helper, peers)
        };
        let response = match helper {
            Some(helper) => {
                let token =
                    issue_membership_token(&inner.identity, requester, inner.now_secs());
                Frame::Response {
                    request_id,
                    success: true,
                    data: BootstrapResponseData {
                        status: BootstrapStatus::HelperCoordinating,
                        peers,
                        onboarding_helper: Some(helper),
                        membership_token: Some(token),
                        ..Default::default()
                    },
                }
            }
            None => Frame::Response {
                request_id,
                success: true,
                data: BootstrapResponseData {
                    status: BootstrapStatus::NetworkEmpty,
                    message: Some("no members registered yet".into()),
                    ..Default::default()
                },
            },
        };
        let _ = outbox.send(response).await;
        return;
    }

    // 3. NAT-restricted joiner: relay through a bridge.
    let bridge = {
        let registry = inner.registry.lock();
        let require_auth = inner.config.bridge_secret.is_some();
        registry
            .bridges()
            .into_iter()
            .filter(|b| b.node_id != requester && (!require_auth || b.bridge_authed))
            .min_by_key(|b| b.node_id.distance(&requester))
            .map(|b| (b.node_id, b.sender.clone()))
    };

    match bridge {
        Some((bridge_id, bridge_outbox)) => {
            let forward_id = uuid::Uuid::new_v4().to_string();
            inner.pending_onboarding.lock().insert(
                forward_id.clone(),
                PendingOnboarding {
                    requester,
                    original_request_id: request_id.clone(),
                },
            );
            debug!(joiner = %requester, bridge = %bridge_id, "Forwarding onboarding to bridge");
            let forwarded = bridge_outbox
                .send(Frame::GetOnboardingPeer {
                    request_id: forward_id.clone(),
                    new_node_id: requester,
                    new_node_metadata: metadata,
                })
                .await
                .is_ok();

            if !forwarded {
                inner.pending_onboarding.lock().remove(&forward_id);
                let response = emergency_or_empty(inner, request_id, &requester);
                let _ = outbox.send(response).await;
                return;
            }

            // Emergency fallback if the bridge never answers.
            let inner = inner.clone();
            let timeout = inner.config.bridge_reply_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let pending = inner.pending_onboarding.lock().remove(&forward_id);
                if let Some(pending) = pending {
                    warn!(joiner = %pending.requester, "Bridge never answered; emergency fallback");
                    let response = emergency_or_empty(
                        &inner,
                        pending.original_request_id,
                        &pending.requester,
                    );
                    send_to(&inner, &pending.requester, response);
                }
            });
        }
        None => {
            let response = emergency_or_empty(inner, request_id, &requester);
            let _ = outbox.send(response).await;
        }
    }
}

/// Last-resort outcomes: flagged direct referrals, or nothing at all.
fn emergency_or_empty(inner: &Arc<ServerInner>, request_id: String, requester: &NodeId) -> Frame {
    let peers: Vec<_> = inner
        .registry
        .lock()
        .dht_members_excluding(requester)
        .into_iter()
        .map(|p| p.descriptor())
        .collect();

    let data = if peers.is_empty() {
        BootstrapResponseData {
            status: BootstrapStatus::NetworkEmpty,
            message: Some("no bridge and no members available".into()),
            ..Default::default()
        }
    } else {
        BootstrapResponseData {
            status: BootstrapStatus::EmergencyBridgeRouting,
            peers,
            message: Some("no bridge available; flagged direct referral".into()),
            ..Default::default()
        }
    };

    Frame::Response {
        request_id,
        success: true,
        data,
    }
}

/// Deliver a frame to a registered participant's outbox.
fn send_to(inner: &Arc<ServerInner>, node_id: &NodeId, frame: Frame) {
    let sender = inner.registry.lock().get(node_id).map(|p| p.sender.clone());
    match sender {
        Some(sender) => {
            if sender.try_send(frame).is_err() {
                debug!(node = %node_id, "Participant outbox full or closed");
            }
        }
        None => debug!(node = %node_id, "Frame for unregistered participant dropped"),
    }
}
