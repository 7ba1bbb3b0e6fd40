//! Core identifiers and peer descriptors.
//!
//! A `NodeId` is 160 bits. It is built exactly one of two ways:
//!
//! 1. [`NodeId::hash_of`] — SHA-1 of an application string; used only for
//!    storage keys and topic identifiers.
//! 2. [`NodeId::from_hex`] / [`NodeId::from_bytes`] — direct adoption of a
//!    wire-received identifier. Wire identifiers are decoded, **never**
//!    rehashed; rehashing produces phantom identifiers that exist in no
//!    routing table.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// Byte width of a node identifier (160 bits).
pub const NODE_ID_LEN: usize = 20;

/// Length of the canonical hex rendering.
pub const NODE_ID_HEX_LEN: usize = 40;

/// Prefix used by transient bootstrap-link identifiers. These never refer
/// to durable DHT participants and are rejected at routing boundaries.
pub const TRANSIENT_ID_PREFIX: &str = "bootstrap_";

/// Errors from identifier parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeIdError {
    /// Input was not exactly 40 characters.
    #[error("Invalid identifier length: expected 40 hex characters, got {0}")]
    InvalidLength(usize),

    /// Input contained a non-hex character.
    #[error("Invalid identifier: not a hex string")]
    NotHex,

    /// Input carried the transient bootstrap prefix.
    #[error("Transient bootstrap identifier is not a durable node id")]
    TransientId,
}

/// 160-bit node identifier.
///
/// Ordering and equality operate on the 20-byte value, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Adopt 20 raw bytes verbatim. No hashing.
    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a 40-character hex string. No hashing.
    ///
    /// Rejects wrong lengths, non-hex characters, and transient
    /// `bootstrap_` identifiers.
    pub fn from_hex(s: &str) -> Result<Self, NodeIdError> {
        if s.starts_with(TRANSIENT_ID_PREFIX) {
            return Err(NodeIdError::TransientId);
        }
        if s.len() != NODE_ID_HEX_LEN {
            return Err(NodeIdError::InvalidLength(s.len()));
        }
        let raw = hex::decode(s).map_err(|_| NodeIdError::NotHex)?;
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    /// Derive an identifier from an application string via SHA-1.
    ///
    /// For storage keys and topic identifiers only — wire-received peer
    /// identifiers go through [`NodeId::from_hex`].
    pub fn hash_of(s: &str) -> Self {
        Self(shared_crypto::sha1_digest(s.as_bytes()))
    }

    /// Raw bytes, big-endian.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Owned copy of the raw bytes.
    pub fn to_bytes(self) -> [u8; NODE_ID_LEN] {
        self.0
    }

    /// Canonical lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Byte-wise XOR distance to `other`.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; NODE_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Check whether a wire string is a durable 40-hex node identifier.
    pub fn is_valid_wire_id(s: &str) -> bool {
        Self::from_hex(s).is_ok()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(D::Error::custom)
    }
}

/// XOR distance between two identifiers, compared lexicographically on
/// big-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(pub [u8; NODE_ID_LEN]);

impl Distance {
    /// Distance zero (an identifier to itself).
    pub fn zero() -> Self {
        Self([0u8; NODE_ID_LEN])
    }

    /// Whether this is the zero distance.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Count of high-order zero bits, 0..=160.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut zeros = 0;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

/// Unix timestamp in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn add_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub fn sub_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    /// Seconds elapsed since `earlier` (saturating).
    pub fn since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Participant classification exchanged in HELLO metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    /// Long-lived, directly reachable participant with a listening address.
    Server,
    /// Ephemeral, NAT-restricted participant reached over a peer channel.
    Client,
    /// Publicly reachable relay that onboards NAT-restricted joiners.
    Bridge,
}

/// Metadata a peer announces about itself.
///
/// Installed on the peer record when a HELLO frame arrives; downstream
/// filtering (bridge selection, inactive-peer fast path) reads from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
    /// Participant classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,

    /// Whether this peer relays onboarding for NAT-restricted joiners.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_bridge_node: bool,

    /// Published stream address, present for directly reachable peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listening_address: Option<String>,

    /// Client-style only: whether the session tab is currently visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_visible: Option<bool>,

    /// Externally observed address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_address: Option<String>,

    /// Capability strings ("dht", "observer", "websocket", "webrtc", ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl PeerMetadata {
    /// Metadata for a directly reachable server participant.
    pub fn server(listening_address: impl Into<String>) -> Self {
        Self {
            node_type: Some(NodeType::Server),
            listening_address: Some(listening_address.into()),
            capabilities: vec!["dht".to_string()],
            ..Default::default()
        }
    }

    /// Metadata for a NAT-restricted client participant.
    pub fn client() -> Self {
        Self {
            node_type: Some(NodeType::Client),
            tab_visible: Some(true),
            capabilities: vec!["dht".to_string(), "webrtc".to_string()],
            ..Default::default()
        }
    }

    /// Metadata for a bridge relay.
    pub fn bridge(listening_address: impl Into<String>) -> Self {
        Self {
            node_type: Some(NodeType::Bridge),
            is_bridge_node: true,
            listening_address: Some(listening_address.into()),
            capabilities: vec!["dht".to_string()],
            ..Default::default()
        }
    }

    /// Whether this peer can participate in DHT routing.
    pub fn is_dht_capable(&self) -> bool {
        self.capabilities.iter().any(|c| c == "dht")
    }

    /// Whether this peer is directly reachable over a stream transport.
    pub fn is_directly_reachable(&self) -> bool {
        self.listening_address.is_some()
    }

    /// Whether the inactive fast path applies (hidden client tab).
    pub fn is_inactive(&self) -> bool {
        self.tab_visible == Some(false)
    }
}

/// Wire form of one known peer, as carried in `nodes` replies and
/// bootstrap responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    /// 40-hex durable identifier.
    pub id: NodeId,

    /// Transport locator, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,

    /// Last time the sender saw this peer (unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,

    /// Announced metadata snapshot.
    #[serde(flatten)]
    pub metadata: PeerMetadata,
}

impl PeerDescriptor {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            addr: None,
            last_seen: None,
            metadata: PeerMetadata::default(),
        }
    }

    pub fn with_metadata(id: NodeId, metadata: PeerMetadata) -> Self {
        Self {
            id,
            addr: None,
            last_seen: None,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_from_byte(b: u8) -> NodeId {
        NodeId::from_bytes([b; NODE_ID_LEN])
    }

    #[test]
    fn hex_round_trip_preserves_identity() {
        let id = id_from_byte(0xab);
        assert_eq!(NodeId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn bytes_round_trip_preserves_identity() {
        let id = id_from_byte(0x5c);
        assert_eq!(NodeId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert_eq!(
            NodeId::from_hex("abcd"),
            Err(NodeIdError::InvalidLength(4))
        );
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let s = "zz".repeat(20);
        assert_eq!(NodeId::from_hex(&s), Err(NodeIdError::NotHex));
    }

    #[test]
    fn from_hex_rejects_transient_prefix() {
        assert_eq!(
            NodeId::from_hex("bootstrap_4f2a"),
            Err(NodeIdError::TransientId)
        );
    }

    #[test]
    fn hash_of_is_sha1_of_the_string() {
        // Decoding the hex of a hashed id must yield the same id: the
        // two constructors agree once an id exists.
        let key = NodeId::hash_of("demo-topic");
        assert_eq!(NodeId::from_hex(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn distance_to_self_is_zero() {
        let id = id_from_byte(7);
        assert!(id.distance(&id).is_zero());
        assert_eq!(id.distance(&id).leading_zero_bits(), 160);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = id_from_byte(1);
        let b = id_from_byte(0xf0);
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_ordering_is_big_endian() {
        let origin = NodeId::from_bytes([0u8; NODE_ID_LEN]);
        let mut near = [0u8; NODE_ID_LEN];
        near[NODE_ID_LEN - 1] = 1;
        let mut far = [0u8; NODE_ID_LEN];
        far[0] = 1;

        let d_near = origin.distance(&NodeId::from_bytes(near));
        let d_far = origin.distance(&NodeId::from_bytes(far));
        assert!(d_near < d_far);
    }

    #[test]
    fn leading_zero_bits_counts_from_high_byte() {
        let origin = NodeId::from_bytes([0u8; NODE_ID_LEN]);
        let mut other = [0u8; NODE_ID_LEN];
        other[0] = 0b0001_0000;
        assert_eq!(origin.distance(&NodeId::from_bytes(other)).leading_zero_bits(), 3);
    }

    #[test]
    fn node_id_serde_is_hex_string() {
        let id = id_from_byte(0x11);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn metadata_bridge_is_reachable_and_flagged() {
        let md = PeerMetadata::bridge("198.51.100.7:9470");
        assert!(md.is_bridge_node);
        assert!(md.is_directly_reachable());
        assert!(md.is_dht_capable());
    }

    #[test]
    fn metadata_hidden_tab_is_inactive() {
        let mut md = PeerMetadata::client();
        assert!(!md.is_inactive());
        md.tab_visible = Some(false);
        assert!(md.is_inactive());
    }
}
