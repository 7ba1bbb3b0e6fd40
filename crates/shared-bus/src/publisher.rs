//! Publishing side of the event bus.

use crate::events::{EventFilter, PeerEvent};
use crate::subscriber::{EventStream, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Interface components use to emit peer events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Returns the number of subscribers that received it.
    fn publish(&self, event: PeerEvent) -> usize;

    /// Total events published over the bus lifetime.
    fn events_published(&self) -> u64;
}

/// In-memory event bus over `tokio::sync::broadcast`.
///
/// Multi-producer, multi-consumer; each subscriber consumes its own copy
/// of every event. A subscriber that falls further behind than the
/// channel capacity loses the oldest events (reported as a lag, never a
/// publisher-side block).
pub struct InMemoryEventBus {
    sender: broadcast::Sender<PeerEvent>,
    events_published: AtomicU64,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with a specific per-subscriber capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe to events matching `filter`.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(topics = ?filter.topics, peer = ?filter.peer, "New bus subscription");
        Subscription::new(self.sender.subscribe(), filter)
    }

    /// Subscribe and wrap the result as a `Stream`.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(filter))
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Per-subscriber buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    fn publish(&self, event: PeerEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(receiver_count) => receiver_count,
            Err(_) => {
                // No live subscribers; the event is dropped. This is
                // normal during startup and shutdown.
                trace!("Event published with no subscribers");
                0
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::NodeId;

    fn peer(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[tokio::test]
    async fn published_events_reach_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::lifecycle());

        bus.publish(PeerEvent::Disconnected { peer: peer(1) });

        let event = sub.recv().await.unwrap();
        assert_eq!(event, PeerEvent::Disconnected { peer: peer(1) });
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_copy() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe(EventFilter::all());
        let mut b = bus.subscribe(EventFilter::all());

        bus.publish(PeerEvent::Disconnected { peer: peer(3) });

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[test]
    fn publish_without_subscribers_is_counted_not_lost() {
        let bus = InMemoryEventBus::new();
        assert_eq!(bus.publish(PeerEvent::Disconnected { peer: peer(2) }), 0);
        assert_eq!(bus.events_published(), 1);
    }
}
