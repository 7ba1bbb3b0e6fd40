//! # Shared Bus - Peer Event Channel
//!
//! The single backchannel between the transport and everything above it.
//! The transport owns connection handles and publishes typed
//! [`PeerEvent`]s; the DHT, the pub/sub layer, and the runtime each
//! consume their own filtered subscription. No component calls back into
//! the transport's internals, and no emitter-style callbacks exist.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Transport   │                    │  DHT core    │
//! │              │    publish()       │              │
//! │              │ ──────┐            └──────────────┘
//! └──────────────┘       │                   ↑
//!                        ▼                   │
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │ ─────────┘
//!                  │              │  subscribe()
//!                  └──────────────┘
//! ```

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventFilter, EventTopic, PeerEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

/// Maximum events buffered per subscriber before the slowest reader lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1024);
    }
}
