//! In-memory registry of connected participants.
//!
//! Entries exist exactly as long as the participant's connection; the
//! coordinator persists nothing.

use shared_types::{Frame, NodeId, NodeType, PeerDescriptor, PeerMetadata};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;

/// One connected participant.
#[derive(Debug, Clone)]
pub struct Participant {
    pub node_id: NodeId,
    pub metadata: PeerMetadata,
    /// Outbox toward this participant's connection.
    pub sender: mpsc::Sender<Frame>,
    pub registered_at: Instant,
    /// Passed the bridge backchannel authentication.
    pub bridge_authed: bool,
}

impl Participant {
    /// Whether this entry is a non-bridge DHT member candidate.
    pub fn is_dht_member(&self) -> bool {
        self.metadata.is_dht_capable()
            && !self.metadata.is_bridge_node
            && self.metadata.node_type != Some(NodeType::Bridge)
    }

    pub fn descriptor(&self) -> PeerDescriptor {
        PeerDescriptor {
            id: self.node_id,
            addr: self.metadata.listening_address.clone(),
            last_seen: None,
            metadata: self.metadata.clone(),
        }
    }
}

/// Registry keyed by node id.
#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<NodeId, Participant>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: Participant) {
        self.participants.insert(participant.node_id, participant);
    }

    pub fn remove(&mut self, node_id: &NodeId) -> Option<Participant> {
        self.participants.remove(node_id)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Participant> {
        self.participants.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut Participant> {
        self.participants.get_mut(node_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Non-bridge DHT members, excluding `exclude`.
    pub fn dht_members_excluding(&self, exclude: &NodeId) -> Vec<&Participant> {
        self.participants
            .values()
            .filter(|p| p.node_id != *exclude && p.is_dht_member())
            .collect()
    }

    /// The registered member XOR-closest to `target`, excluding
    /// `exclude`.
    pub fn closest_dht_member(&self, target: &NodeId, exclude: &NodeId) -> Option<&Participant> {
        self.dht_members_excluding(exclude)
            .into_iter()
            .min_by_key(|p| p.node_id.distance(target))
    }

    /// Registered bridge relays.
    pub fn bridges(&self) -> Vec<&Participant> {
        self.participants
            .values()
            .filter(|p| p.metadata.is_bridge_node)
            .collect()
    }

    pub fn bridge_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.metadata.is_bridge_node)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(b: u8, metadata: PeerMetadata) -> Participant {
        let (sender, _rx) = mpsc::channel(4);
        Participant {
            node_id: NodeId::from_bytes([b; 20]),
            metadata,
            sender,
            registered_at: Instant::now(),
            bridge_authed: false,
        }
    }

    #[test]
    fn bridges_are_not_dht_member_candidates() {
        let mut registry = Registry::new();
        registry.insert(participant(1, PeerMetadata::server("203.0.113.1:9470")));
        registry.insert(participant(2, PeerMetadata::bridge("203.0.113.2:9470")));

        let exclude = NodeId::from_bytes([9u8; 20]);
        let members = registry.dht_members_excluding(&exclude);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].node_id, NodeId::from_bytes([1u8; 20]));
        assert_eq!(registry.bridge_count(), 1);
    }

    #[test]
    fn closest_member_is_by_xor_distance() {
        let mut registry = Registry::new();
        registry.insert(participant(0x10, PeerMetadata::server("a:1")));
        registry.insert(participant(0x7f, PeerMetadata::server("b:1")));

        let target = NodeId::from_bytes([0x11; 20]);
        let exclude = NodeId::from_bytes([0xff; 20]);
        let closest = registry.closest_dht_member(&target, &exclude).unwrap();
        assert_eq!(closest.node_id, NodeId::from_bytes([0x10; 20]));
    }

    #[test]
    fn requester_is_excluded_from_member_candidates() {
        let mut registry = Registry::new();
        registry.insert(participant(1, PeerMetadata::server("a:1")));

        let requester = NodeId::from_bytes([1u8; 20]);
        assert!(registry.closest_dht_member(&requester, &requester).is_none());
    }
}
