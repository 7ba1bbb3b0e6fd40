//! The wire frame set.
//!
//! Every frame is a JSON object with a `type` tag. RPC frames carry a
//! `requestId` that the reply echoes; responses route back by that id.
//! On stream transports frames are length-delimited with a u32
//! big-endian prefix; on the datagram transport one frame rides per
//! datagram.

use crate::entities::{NodeId, PeerDescriptor, PeerMetadata};
use crate::tokens::MembershipToken;
use serde::{Deserialize, Serialize};

/// Application message carried by the pub/sub layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Globally unique message id (`<uuid>:<publisher-hex>`).
    #[serde(rename = "messageID")]
    pub message_id: String,

    /// Hashed topic identifier.
    #[serde(rename = "topicID")]
    pub topic_id: NodeId,

    /// Publishing node.
    #[serde(rename = "publisherID")]
    pub publisher_id: NodeId,

    /// Publication time, unix milliseconds.
    #[serde(rename = "publishedAt")]
    pub published_at: u64,

    /// Opaque application payload.
    pub payload: serde_json::Value,

    /// Expiry time, unix milliseconds.
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
}

impl MessageEnvelope {
    /// Whether the envelope has expired at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Overlay-routed application payload, forwarded hop by hop toward its
/// destination. Deduplicated by `(id, origin)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedEnvelope {
    /// Originator-unique message id.
    pub id: String,

    /// The node that injected the message into the overlay.
    pub origin: NodeId,

    /// Inner payload; typically an embedded frame (e.g. `pubsub_push`).
    pub payload: serde_json::Value,
}

/// Onboarding outcome the bootstrap server assembles for a joiner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponseData {
    /// Outcome classification.
    pub status: BootstrapStatus,

    /// Candidate peers, when any are known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerDescriptor>,

    /// Set when the requester was elected genesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_genesis: Option<bool>,

    /// Membership token (genesis or invitation-derived).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_token: Option<MembershipToken>,

    /// The member chosen to onboard the requester directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_helper: Option<PeerDescriptor>,

    /// Human-readable detail, set on degraded outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status of a `get_peers_or_genesis` exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatus {
    /// Requester is the first member; a genesis token is attached.
    Genesis,
    /// A directly reachable member will onboard the requester.
    HelperCoordinating,
    /// No bridge available; known DHT entries returned as a flagged
    /// last-resort referral.
    EmergencyBridgeRouting,
    /// Nothing to offer; the network has no members yet.
    #[default]
    NetworkEmpty,
}

/// Every frame Trellis puts on a wire.
///
/// The `type` tag is the snake_case variant name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // ------------------------------------------------------------------
    // Link layer
    // ------------------------------------------------------------------
    /// First frame on every fresh link, both directions.
    #[serde(rename_all = "camelCase")]
    Hello {
        node_id: NodeId,
        protocol_version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        build_id: Option<String>,
        metadata: PeerMetadata,
    },

    /// Liveness probe.
    #[serde(rename_all = "camelCase")]
    Ping { request_id: String },

    /// Liveness reply.
    #[serde(rename_all = "camelCase")]
    Pong { request_id: String, ts: u64 },

    // ------------------------------------------------------------------
    // DHT RPCs
    // ------------------------------------------------------------------
    /// Request the k closest known peers to `target`.
    #[serde(rename_all = "camelCase")]
    FindNode {
        request_id: String,
        target: NodeId,
        /// Set when the caller is on the inactive-peer fast path and
        /// will give up quickly.
        #[serde(skip_serializing_if = "Option::is_none")]
        fast: Option<bool>,
    },

    /// Reply to `find_node`.
    #[serde(rename_all = "camelCase")]
    Nodes {
        request_id: String,
        peers: Vec<PeerDescriptor>,
    },

    /// Request a stored value, or the closest peers to its key.
    #[serde(rename_all = "camelCase")]
    FindValue { request_id: String, key: NodeId },

    /// Reply to `find_value`.
    #[serde(rename_all = "camelCase")]
    Value {
        request_id: String,
        found: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        peers: Option<Vec<PeerDescriptor>>,
    },

    /// Ask the receiver to hold a record.
    #[serde(rename_all = "camelCase")]
    Store {
        request_id: String,
        key: NodeId,
        value: serde_json::Value,
        expires_at: u64,
    },

    /// Reply to `store`.
    #[serde(rename_all = "camelCase")]
    Stored { request_id: String, ok: bool },

    /// Overlay-routed application message; forwarded toward `dest`.
    #[serde(rename_all = "camelCase")]
    DhtMessage {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        dest: NodeId,
        hops_left: u32,
        envelope: RoutedEnvelope,
    },

    // ------------------------------------------------------------------
    // Pub/sub RPCs
    // ------------------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    PubsubSubscribe {
        request_id: String,
        #[serde(rename = "topicID")]
        topic_id: NodeId,
        subscriber: NodeId,
    },

    #[serde(rename_all = "camelCase")]
    PubsubSubscribed {
        request_id: String,
        version: u64,
        subscribers: Vec<NodeId>,
        recent_messages: Vec<MessageEnvelope>,
    },

    #[serde(rename_all = "camelCase")]
    PubsubUnsubscribe {
        request_id: String,
        #[serde(rename = "topicID")]
        topic_id: NodeId,
        subscriber: NodeId,
    },

    #[serde(rename_all = "camelCase")]
    PubsubPublish {
        request_id: String,
        envelope: MessageEnvelope,
    },

    #[serde(rename_all = "camelCase")]
    PubsubPublished {
        request_id: String,
        #[serde(rename = "messageID")]
        message_id: String,
        accepted: bool,
    },

    /// Coordinator push to a subscriber. No reply expected.
    #[serde(rename_all = "camelCase")]
    PubsubPush {
        #[serde(rename = "topicID")]
        topic_id: NodeId,
        envelope: MessageEnvelope,
    },

    #[serde(rename_all = "camelCase")]
    PubsubTopicInfo {
        request_id: String,
        #[serde(rename = "topicID")]
        topic_id: NodeId,
    },

    #[serde(rename_all = "camelCase")]
    PubsubTopicInfoResult {
        request_id: String,
        version: u64,
        subscribers: Vec<NodeId>,
        messages: Vec<MessageEnvelope>,
    },

    /// Error reply to any RPC (unauthorized, malformed, unavailable).
    #[serde(rename_all = "camelCase")]
    RpcError {
        request_id: String,
        category: String,
        message: String,
    },

    // ------------------------------------------------------------------
    // Bootstrap protocol (node <-> coordinator)
    // ------------------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    Register {
        node_id: NodeId,
        protocol_version: String,
        build_id: String,
        timestamp: u64,
        metadata: PeerMetadata,
    },

    #[serde(rename_all = "camelCase")]
    Registered { node_id: NodeId },

    /// Fatal compatibility rejection; the client must not continue.
    #[serde(rename_all = "camelCase")]
    VersionMismatch {
        client_version: String,
        server_version: String,
        client_build_id: String,
        server_build_id: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    GetPeersOrGenesis {
        request_id: String,
        node_id: NodeId,
        max_peers: usize,
        metadata: PeerMetadata,
    },

    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        success: bool,
        data: BootstrapResponseData,
    },

    /// Bridge-to-coordinator backchannel authentication.
    #[serde(rename_all = "camelCase")]
    BootstrapAuth {
        auth_token: String,
        bootstrap_server: String,
    },

    /// Coordinator asks a bridge to choose an onboarding member for a
    /// NAT-restricted joiner.
    #[serde(rename_all = "camelCase")]
    GetOnboardingPeer {
        request_id: String,
        new_node_id: NodeId,
        new_node_metadata: PeerMetadata,
    },

    #[serde(rename_all = "camelCase")]
    OnboardingPeerResponse {
        request_id: String,
        data: OnboardingPeerData,
    },

    // ------------------------------------------------------------------
    // Signalling relay (opaque to the overlay; delivered unchanged)
    // ------------------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    Signal {
        from: NodeId,
        to: NodeId,
        payload: serde_json::Value,
    },
}

/// Payload of `onboarding_peer_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPeerData {
    /// The member chosen to onboard the joiner.
    pub peer: PeerDescriptor,

    /// Membership token minted for the joiner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_token: Option<MembershipToken>,
}

impl Frame {
    /// The request id this frame carries, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Frame::Ping { request_id }
            | Frame::Pong { request_id, .. }
            | Frame::FindNode { request_id, .. }
            | Frame::Nodes { request_id, .. }
            | Frame::FindValue { request_id, .. }
            | Frame::Value { request_id, .. }
            | Frame::Store { request_id, .. }
            | Frame::Stored { request_id, .. }
            | Frame::PubsubSubscribe { request_id, .. }
            | Frame::PubsubSubscribed { request_id, .. }
            | Frame::PubsubUnsubscribe { request_id, .. }
            | Frame::PubsubPublish { request_id, .. }
            | Frame::PubsubPublished { request_id, .. }
            | Frame::PubsubTopicInfo { request_id, .. }
            | Frame::PubsubTopicInfoResult { request_id, .. }
            | Frame::RpcError { request_id, .. }
            | Frame::GetPeersOrGenesis { request_id, .. }
            | Frame::Response { request_id, .. }
            | Frame::GetOnboardingPeer { request_id, .. }
            | Frame::OnboardingPeerResponse { request_id, .. } => Some(request_id),
            Frame::DhtMessage { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Whether this frame is a reply that should route back to a waiter.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Frame::Pong { .. }
                | Frame::Nodes { .. }
                | Frame::Value { .. }
                | Frame::Stored { .. }
                | Frame::PubsubSubscribed { .. }
                | Frame::PubsubPublished { .. }
                | Frame::PubsubTopicInfoResult { .. }
                | Frame::RpcError { .. }
                | Frame::Response { .. }
                | Frame::OnboardingPeerResponse { .. }
        )
    }
}
