//! Topic types and retention policy.

use shared_types::{MessageEnvelope, NodeId};

/// Result of a subscribe call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOutcome {
    /// Topic version at join time.
    pub version: u64,
    /// Current subscribers (including the caller).
    pub subscribers: Vec<NodeId>,
    /// Unexpired historical messages, oldest first.
    pub recent_messages: Vec<MessageEnvelope>,
    /// Set when this call rode on another caller's in-flight join.
    pub concurrent: bool,
}

/// Pluggable retention for a topic's message collection.
///
/// The coordinator applies the policy before replaying history and
/// during garbage collection.
pub trait RetentionPolicy: Send + Sync {
    /// Drop messages that should no longer be retained.
    fn retain(&self, messages: &mut Vec<MessageEnvelope>, now_ms: u64);
}

/// Default policy: keep exactly the unexpired slice.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpiryRetention;

impl RetentionPolicy for ExpiryRetention {
    fn retain(&self, messages: &mut Vec<MessageEnvelope>, now_ms: u64) {
        messages.retain(|m| !m.is_expired(now_ms));
    }
}

/// Durable-state key for a topic (subscriber set and version survive a
/// coordinator hand-off through the DHT; history does not).
pub fn topic_state_key(topic: &NodeId) -> NodeId {
    NodeId::hash_of(&format!("pubsub:state:{}", topic.to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(expires_at: u64) -> MessageEnvelope {
        MessageEnvelope {
            message_id: format!("m-{expires_at}"),
            topic_id: NodeId::from_bytes([1u8; 20]),
            publisher_id: NodeId::from_bytes([2u8; 20]),
            published_at: 0,
            payload: serde_json::json!(null),
            expires_at,
        }
    }

    #[test]
    fn expiry_retention_keeps_unexpired_slice() {
        let mut messages = vec![envelope(100), envelope(2000), envelope(500)];
        ExpiryRetention.retain(&mut messages, 600);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].expires_at, 2000);
    }

    #[test]
    fn state_key_is_stable_and_distinct() {
        let a = NodeId::hash_of("topic-a");
        let b = NodeId::hash_of("topic-b");
        assert_eq!(topic_state_key(&a), topic_state_key(&a));
        assert_ne!(topic_state_key(&a), topic_state_key(&b));
    }
}
