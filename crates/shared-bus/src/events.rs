//! Event types flowing through the peer bus.

use serde::{Deserialize, Serialize};
use shared_types::{Frame, NodeId, PeerMetadata};

/// Everything the transport reports about peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerEvent {
    /// A link to `peer` is up, HELLO has been exchanged, and metadata is
    /// installed. Exactly one of these surfaces per peer even when both
    /// sides dialled concurrently.
    Connected {
        peer: NodeId,
        /// Whether the local side initiated the surviving link.
        initiator: bool,
        metadata: PeerMetadata,
    },

    /// The link to `peer` is gone (close, keep-alive expiry, eviction).
    Disconnected { peer: NodeId },

    /// An inbound frame arrived from `peer`.
    Frame { peer: NodeId, frame: Frame },

    /// An outbound frame to `peer` was dropped: its send buffer was full.
    BackpressureDropped { peer: NodeId },
}

impl PeerEvent {
    /// The peer this event concerns.
    pub fn peer(&self) -> NodeId {
        match self {
            PeerEvent::Connected { peer, .. }
            | PeerEvent::Disconnected { peer }
            | PeerEvent::Frame { peer, .. }
            | PeerEvent::BackpressureDropped { peer } => *peer,
        }
    }

    /// Coarse classification for filtering.
    pub fn topic(&self) -> EventTopic {
        match self {
            PeerEvent::Connected { .. } | PeerEvent::Disconnected { .. } => EventTopic::Lifecycle,
            PeerEvent::Frame { .. } => EventTopic::Frames,
            PeerEvent::BackpressureDropped { .. } => EventTopic::Pressure,
        }
    }
}

/// Event classes a subscriber can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Connect / disconnect.
    Lifecycle,
    /// Inbound frames.
    Frames,
    /// Backpressure reports.
    Pressure,
}

/// Subscription filter: which topics, optionally which peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Selected topics; empty selects all.
    pub topics: Vec<EventTopic>,

    /// When set, only events about this peer pass.
    pub peer: Option<NodeId>,
}

impl EventFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match only connect/disconnect events.
    pub fn lifecycle() -> Self {
        Self {
            topics: vec![EventTopic::Lifecycle],
            peer: None,
        }
    }

    /// Match only inbound frames.
    pub fn frames() -> Self {
        Self {
            topics: vec![EventTopic::Frames],
            peer: None,
        }
    }

    /// Restrict the filter to a single peer.
    pub fn for_peer(mut self, peer: NodeId) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &PeerEvent) -> bool {
        if let Some(peer) = self.peer {
            if event.peer() != peer {
                return false;
            }
        }
        self.topics.is_empty() || self.topics.contains(&event.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::all();
        assert!(filter.matches(&PeerEvent::Disconnected { peer: peer(1) }));
        assert!(filter.matches(&PeerEvent::BackpressureDropped { peer: peer(2) }));
    }

    #[test]
    fn lifecycle_filter_excludes_frames() {
        let filter = EventFilter::lifecycle();
        assert!(filter.matches(&PeerEvent::Disconnected { peer: peer(1) }));
        assert!(!filter.matches(&PeerEvent::Frame {
            peer: peer(1),
            frame: Frame::Ping {
                request_id: "r".into()
            },
        }));
    }

    #[test]
    fn peer_filter_excludes_other_peers() {
        let filter = EventFilter::all().for_peer(peer(1));
        assert!(filter.matches(&PeerEvent::Disconnected { peer: peer(1) }));
        assert!(!filter.matches(&PeerEvent::Disconnected { peer: peer(2) }));
    }
}
