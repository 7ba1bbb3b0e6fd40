//! Node assembly and the bootstrap join flow.
//!
//! Boot order: identity → transport → DHT → pub/sub → bootstrap join.
//! The join directive decides the path: a genesis grant makes a network
//! of one; a helper directive dials the named member (directly, or via
//! datagram signalling when this node is NAT-restricted); the emergency
//! directive tries the flagged referrals in order. Any pre-running
//! failure is surfaced to the caller, which can retry — the DHT state
//! machine falls back to the bootstrap phase.

use crate::config::NodeConfig;
use crate::context::NodeContext;
use crate::signalling;
use anyhow::Context as _;
use shared_bus::InMemoryEventBus;
use shared_types::{NodeId, NodeType, PeerDescriptor, PeerMetadata, TrellisError, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tr_02_transport::hello::LocalHello;
use tr_02_transport::{ConnectionManager, TransportConfig};
use tr_03_identity::{
    membership::issue_membership_token, BlobStore, FileBlobStore, MemoryBlobStore, NodeIdentity,
    TokenVerifier,
};
use tr_04_bootstrap::{BootstrapClient, BootstrapEvent, JoinDirective, Registration};
use tr_05_dht::{AppFrame, DhtConfig, DhtNode, DhtState};
use tr_06_pubsub::{PubsubConfig, PubsubManager};
use tracing::{debug, info, warn};
use trellis_telemetry::SafeMetrics;

/// How long to wait for an onboarding connection to come up.
const ONBOARDING_TIMEOUT: Duration = Duration::from_secs(15);

/// Membership token blob-store key.
const MEMBERSHIP_STORE_KEY: &str = "identity/membership";

/// Assemble and join. Returns a running node.
pub async fn start_node(config: NodeConfig) -> anyhow::Result<NodeContext> {
    let store: Arc<dyn BlobStore> = match &config.data_dir {
        Some(dir) => Arc::new(FileBlobStore::new(dir.clone())?),
        None => Arc::new(MemoryBlobStore::new()),
    };
    let identity = Arc::new(NodeIdentity::load_or_generate(store.as_ref())?);
    let node_id = identity.node_id();
    info!(node = %node_id, node_type = ?config.node_type, "Starting Trellis node");

    let metadata = build_metadata(&config);
    let bus = Arc::new(InMemoryEventBus::new());
    let metrics = SafeMetrics::new();
    let hello = LocalHello {
        node_id,
        protocol_version: PROTOCOL_VERSION.to_string(),
        build_id: config.build_id.clone(),
        metadata: metadata.clone(),
    };
    let transport = ConnectionManager::new(
        hello,
        TransportConfig::default(),
        bus.clone(),
        metrics.clone(),
    );

    if let Some(listen) = &config.listen_addr {
        let bound = transport
            .listen(listen)
            .await
            .with_context(|| format!("bind stream listener on {listen}"))?;
        // Publish the address we actually bound (the config may have
        // asked for an ephemeral port).
        transport.update_metadata(|m| {
            if m.listening_address.is_some() {
                m.listening_address = Some(bound.to_string());
            }
        });
    }

    // Every node carries a datagram endpoint: clients are reached only
    // this way, and servers must answer their channel offers.
    let datagram_bind = config.datagram_bind.clone().unwrap_or_else(|| "0.0.0.0:0".into());
    transport
        .enable_datagram(&datagram_bind)
        .await
        .with_context(|| format!("bind datagram socket on {datagram_bind}"))?;

    let metadata = transport.local_hello().metadata;

    let (dht, app_rx) = DhtNode::new(
        transport.clone(),
        bus.clone(),
        metrics.clone(),
        DhtConfig::default(),
    );
    let (signal_tx, signal_rx) = mpsc::channel(64);
    let (pubsub, deliveries) = PubsubManager::new(
        dht.clone(),
        app_rx,
        Some(signal_tx),
        PubsubConfig::default(),
    );

    dht.set_state(DhtState::ConnectingBootstrap)
        .map_err(TrellisError::from)?;

    let registration = Registration::new(node_id, config.build_id.clone(), metadata.clone());
    let (bootstrap, events, directive) = BootstrapClient::join_with_backoff(
        &config.bootstrap_addr,
        registration,
        8,
        config.max_join_attempts,
    )
    .await
    .map_err(TrellisError::from)?;

    if config.is_bridge {
        if let Some(secret) = &config.bridge_secret {
            bootstrap
                .authenticate_bridge(secret, &config.bootstrap_addr)
                .await
                .map_err(TrellisError::from)?;
        }
    }

    // Event handling must be live before onboarding: the signalling
    // answer for a NAT join arrives while we are still mid-directive.
    spawn_bootstrap_event_task(
        events,
        bootstrap.clone(),
        transport.clone(),
        dht.clone(),
        identity.clone(),
    );
    spawn_signal_relay_task(signal_rx, bootstrap.clone(), transport.clone());

    let mut verifier = TokenVerifier::new();
    follow_directive(&config, &dht, &transport, &bootstrap, &store, &mut verifier, directive)
        .await?;

    // Classic join lookup: walk toward our own id to seed the routing
    // table with our neighborhood (a network of one finds nobody, and
    // that is fine).
    let _ = dht.find_node(node_id).await;

    info!(node = %node_id, peers = dht.connected_alive(), "Node running");
    Ok(NodeContext {
        node_id,
        bus,
        metrics,
        transport,
        dht,
        pubsub,
        bootstrap,
        deliveries,
    })
}

fn build_metadata(config: &NodeConfig) -> PeerMetadata {
    let mut metadata = match config.node_type {
        NodeType::Server => {
            PeerMetadata::server(config.listen_addr.clone().unwrap_or_default())
        }
        NodeType::Client => PeerMetadata::client(),
        NodeType::Bridge => {
            PeerMetadata::bridge(config.listen_addr.clone().unwrap_or_default())
        }
    };
    if config.is_bridge {
        metadata.is_bridge_node = true;
    }
    metadata
}

/// Execute the coordinator's onboarding decision.
async fn follow_directive(
    config: &NodeConfig,
    dht: &DhtNode,
    transport: &ConnectionManager,
    bootstrap: &BootstrapClient,
    store: &Arc<dyn BlobStore>,
    verifier: &mut TokenVerifier,
    directive: JoinDirective,
) -> anyhow::Result<()> {
    let node_id = transport.local_id();
    let now = shared_types::Timestamp::now().as_secs();

    match directive {
        JoinDirective::Genesis(token) => {
            verifier.trust_issuer(token.issuer);
            verifier
                .verify_membership(&token, node_id, now)
                .map_err(TrellisError::from)?;
            persist_token(store, &token);
            info!("Joined as genesis member; the network is one node");
            dht.set_state(DhtState::GenesisAssigned).map_err(TrellisError::from)?;
            dht.set_state(DhtState::Bootstrapped).map_err(TrellisError::from)?;
            dht.set_state(DhtState::Running).map_err(TrellisError::from)?;
            Ok(())
        }

        JoinDirective::Helper { peer, token, peers } => {
            dht.set_state(DhtState::AwaitingOnboarding).map_err(TrellisError::from)?;
            if let Some(token) = token {
                verifier.trust_issuer(token.issuer);
                verifier
                    .verify_membership(&token, node_id, now)
                    .map_err(TrellisError::from)?;
                persist_token(store, &token);
            }

            connect_to_helper(config, transport, bootstrap, &peer).await?;
            wait_for_member(dht, ONBOARDING_TIMEOUT).await?;
            debug!(referrals = peers.len(), "Onboarded through helper");

            dht.set_state(DhtState::Bootstrapped).map_err(TrellisError::from)?;
            dht.set_state(DhtState::Running).map_err(TrellisError::from)?;
            Ok(())
        }

        JoinDirective::EmergencyPeers { peers, message } => {
            warn!(
                detail = message.as_deref().unwrap_or(""),
                "Emergency referral path"
            );
            dht.set_state(DhtState::AwaitingOnboarding).map_err(TrellisError::from)?;
            for descriptor in &peers {
                if connect_to_helper(config, transport, bootstrap, descriptor)
                    .await
                    .is_ok()
                {
                    wait_for_member(dht, ONBOARDING_TIMEOUT).await?;
                    dht.set_state(DhtState::Bootstrapped).map_err(TrellisError::from)?;
                    dht.set_state(DhtState::Running).map_err(TrellisError::from)?;
                    return Ok(());
                }
            }
            Err(TrellisError::network_isolated("no referral peer could be reached").into())
        }

        JoinDirective::NetworkEmpty => {
            Err(TrellisError::network_isolated("the network has no members yet").into())
        }
    }
}

/// Reach the onboarding helper: direct stream dial when it publishes an
/// address, datagram signalling otherwise.
async fn connect_to_helper(
    config: &NodeConfig,
    transport: &ConnectionManager,
    bootstrap: &BootstrapClient,
    peer: &PeerDescriptor,
) -> anyhow::Result<()> {
    let addr = peer
        .addr
        .clone()
        .or_else(|| peer.metadata.listening_address.clone());

    match addr {
        Some(addr) if config.node_type != NodeType::Client => {
            transport
                .connect_expect(&addr, peer.id)
                .await
                .map_err(TrellisError::from)?;
            Ok(())
        }
        _ => {
            // NAT path: offer a datagram channel and wait for the link.
            signalling::send_offer(bootstrap, transport, peer.id).await?;
            wait_for_connection(transport, peer.id, ONBOARDING_TIMEOUT).await
        }
    }
}

async fn wait_for_connection(
    transport: &ConnectionManager,
    peer: NodeId,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if transport.is_connected(&peer) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(TrellisError::timeout(format!("onboarding connection to {peer} did not come up")).into())
}

/// Wait until the routing table reflects at least one live member
/// connection (the transport link exists; the table update rides the
/// event bus and may land a beat later).
async fn wait_for_member(dht: &DhtNode, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if dht.connected_alive() >= 1 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Err(TrellisError::network_isolated("peer connection never registered in the table").into())
}

fn persist_token(store: &Arc<dyn BlobStore>, token: &shared_types::MembershipToken) {
    match serde_json::to_vec(token) {
        Ok(bytes) => {
            if let Err(e) = store.put(MEMBERSHIP_STORE_KEY, &bytes) {
                warn!(error = %e, "Could not persist membership token");
            }
        }
        Err(e) => warn!(error = %e, "Could not encode membership token"),
    }
}

/// Coordinator-link events: relayed signalling and bridge duty.
fn spawn_bootstrap_event_task(
    mut events: mpsc::Receiver<BootstrapEvent>,
    bootstrap: BootstrapClient,
    transport: ConnectionManager,
    dht: DhtNode,
    identity: Arc<NodeIdentity>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BootstrapEvent::Signal { from, payload } => {
                    signalling::handle_signal(&bootstrap, &transport, from, payload).await;
                }
                BootstrapEvent::OnboardingRequest {
                    request_id,
                    new_node_id,
                    ..
                } => {
                    handle_onboarding_request(
                        &bootstrap, &transport, &dht, &identity, request_id, new_node_id,
                    )
                    .await;
                }
                BootstrapEvent::Disconnected => {
                    warn!("Bootstrap link dropped");
                }
            }
        }
    });
}

/// Bridge duty: pick the member closest to the joiner and mint its
/// membership token.
async fn handle_onboarding_request(
    bootstrap: &BootstrapClient,
    transport: &ConnectionManager,
    dht: &DhtNode,
    identity: &Arc<NodeIdentity>,
    request_id: String,
    new_node_id: NodeId,
) {
    let candidates = dht.find_node(new_node_id).await.unwrap_or_default();
    let peer = candidates
        .into_iter()
        .find(|d| d.metadata.is_directly_reachable())
        .unwrap_or_else(|| {
            // Fall back to ourselves; we are reachable by definition.
            let hello = transport.local_hello();
            PeerDescriptor::with_metadata(hello.node_id, hello.metadata)
        });

    let now = shared_types::Timestamp::now().as_secs();
    let token = issue_membership_token(identity, new_node_id, now);
    debug!(joiner = %new_node_id, helper = %peer.id, "Answering onboarding query");
    if let Err(e) = bootstrap
        .respond_onboarding(request_id, peer, Some(token))
        .await
    {
        warn!(error = %e, "Onboarding response failed");
    }
}

/// Signalling that arrived over a DHT link instead of the bootstrap
/// relay (once the overlay can carry it, it does).
fn spawn_signal_relay_task(
    mut signal_rx: mpsc::Receiver<AppFrame>,
    bootstrap: BootstrapClient,
    transport: ConnectionManager,
) {
    tokio::spawn(async move {
        while let Some(app_frame) = signal_rx.recv().await {
            if let shared_types::Frame::Signal { from, to, payload } = app_frame.frame {
                if to == transport.local_id() {
                    signalling::handle_signal(&bootstrap, &transport, from, payload).await;
                } else if let Err(e) = transport.send(
                    to,
                    shared_types::Frame::Signal { from, to, payload },
                ) {
                    debug!(dest = %to, error = %e, "Signal relay failed");
                }
            }
        }
    });
}
