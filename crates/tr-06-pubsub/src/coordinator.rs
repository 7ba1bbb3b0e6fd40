//! Coordinator-side topic state.
//!
//! A node is coordinator for every topic whose hashed id it is closest
//! to among live peers. The coordinator owns the authoritative
//! subscriber list, assigns the monotonically increasing topic version,
//! retains the message collection under the retention policy, and
//! pushes publications to subscribers.
//!
//! Hand-off: the subscriber set and version are mirrored into the DHT
//! under a derived state key. A successor coordinator recovers that
//! current state on first contact; history stays behind.

use crate::types::{ExpiryRetention, RetentionPolicy};
use serde::{Deserialize, Serialize};
use shared_types::{MessageEnvelope, NodeId};
use std::collections::HashMap;
use tracing::debug;

/// Authoritative state of one coordinated topic.
#[derive(Debug, Default)]
pub struct TopicState {
    /// Incremented on every accepted publication and membership change.
    pub version: u64,
    /// Current subscribers.
    pub subscribers: Vec<NodeId>,
    /// Retained message collection, oldest first.
    pub messages: Vec<MessageEnvelope>,
}

/// Durable slice of topic state that survives a coordinator change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTopicState {
    pub version: u64,
    pub subscribers: Vec<NodeId>,
}

/// All topics this node currently coordinates.
pub struct CoordinatorState {
    topics: HashMap<NodeId, TopicState>,
    retention: Box<dyn RetentionPolicy>,
}

impl std::fmt::Debug for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorState")
            .field("topics", &self.topics.len())
            .finish()
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self::new(Box::new(ExpiryRetention))
    }
}

impl CoordinatorState {
    pub fn new(retention: Box<dyn RetentionPolicy>) -> Self {
        Self {
            topics: HashMap::new(),
            retention,
        }
    }

    /// Install state recovered from a predecessor coordinator.
    pub fn adopt(&mut self, topic: NodeId, persisted: PersistedTopicState) {
        let state = self.topics.entry(topic).or_default();
        if persisted.version > state.version {
            state.version = persisted.version;
            for subscriber in persisted.subscribers {
                if !state.subscribers.contains(&subscriber) {
                    state.subscribers.push(subscriber);
                }
            }
            debug!(topic = %topic, version = state.version, "Adopted predecessor topic state");
        }
    }

    /// Add a subscriber; returns `(version, subscribers, replay)`.
    pub fn subscribe(
        &mut self,
        topic: NodeId,
        subscriber: NodeId,
        now_ms: u64,
    ) -> (u64, Vec<NodeId>, Vec<MessageEnvelope>) {
        let retention = &self.retention;
        let state = self.topics.entry(topic).or_default();
        if !state.subscribers.contains(&subscriber) {
            state.subscribers.push(subscriber);
            state.version += 1;
        }
        retention.retain(&mut state.messages, now_ms);
        (
            state.version,
            state.subscribers.clone(),
            state.messages.clone(),
        )
    }

    /// Remove a subscriber. Returns whether it was present.
    pub fn unsubscribe(&mut self, topic: &NodeId, subscriber: &NodeId) -> bool {
        let Some(state) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s != subscriber);
        let removed = state.subscribers.len() < before;
        if removed {
            state.version += 1;
        }
        removed
    }

    /// Accept a publication into the topic's collection.
    ///
    /// Duplicate message ids are refused (idempotent publish). Returns
    /// the subscriber list to push to on acceptance.
    pub fn publish(
        &mut self,
        envelope: MessageEnvelope,
        now_ms: u64,
    ) -> Option<Vec<NodeId>> {
        if envelope.is_expired(now_ms) {
            return None;
        }
        let retention = &self.retention;
        let state = self.topics.entry(envelope.topic_id).or_default();
        if state
            .messages
            .iter()
            .any(|m| m.message_id == envelope.message_id)
        {
            return None;
        }
        state.messages.push(envelope);
        state.version += 1;
        retention.retain(&mut state.messages, now_ms);
        Some(state.subscribers.clone())
    }

    /// Topic info for `pubsub_topic_info`.
    pub fn info(
        &mut self,
        topic: &NodeId,
        now_ms: u64,
    ) -> Option<(u64, Vec<NodeId>, Vec<MessageEnvelope>)> {
        let retention = &self.retention;
        let state = self.topics.get_mut(topic)?;
        retention.retain(&mut state.messages, now_ms);
        Some((
            state.version,
            state.subscribers.clone(),
            state.messages.clone(),
        ))
    }

    /// Durable slice for hand-off via the DHT.
    pub fn persistable(&self, topic: &NodeId) -> Option<PersistedTopicState> {
        self.topics.get(topic).map(|state| PersistedTopicState {
            version: state.version,
            subscribers: state.subscribers.clone(),
        })
    }

    /// Purge expired messages everywhere; drop dead topics.
    pub fn gc(&mut self, now_ms: u64) {
        let retention = &self.retention;
        for state in self.topics.values_mut() {
            retention.retain(&mut state.messages, now_ms);
        }
        self.topics
            .retain(|_, s| !s.subscribers.is_empty() || !s.messages.is_empty());
    }

    /// Topics currently coordinated.
    pub fn topic_ids(&self) -> Vec<NodeId> {
        self.topics.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> NodeId {
        NodeId::hash_of("room")
    }

    fn subscriber(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    fn envelope(id: &str, expires_at: u64) -> MessageEnvelope {
        MessageEnvelope {
            message_id: id.into(),
            topic_id: topic(),
            publisher_id: subscriber(9),
            published_at: 0,
            payload: serde_json::json!({"n": id}),
            expires_at,
        }
    }

    #[test]
    fn subscribe_bumps_version_once_per_member() {
        let mut coordinator = CoordinatorState::default();
        let (v1, subs, _) = coordinator.subscribe(topic(), subscriber(1), 0);
        assert_eq!(v1, 1);
        assert_eq!(subs, vec![subscriber(1)]);

        // Re-subscribing the same member is idempotent.
        let (v2, subs, _) = coordinator.subscribe(topic(), subscriber(1), 0);
        assert_eq!(v2, 1);
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn publish_pushes_to_subscribers_and_dedups() {
        let mut coordinator = CoordinatorState::default();
        coordinator.subscribe(topic(), subscriber(1), 0);

        let targets = coordinator.publish(envelope("m1", 10_000), 0).unwrap();
        assert_eq!(targets, vec![subscriber(1)]);

        // Replaying the same message id is refused.
        assert!(coordinator.publish(envelope("m1", 10_000), 0).is_none());
    }

    #[test]
    fn replay_returns_only_unexpired_slice() {
        let mut coordinator = CoordinatorState::default();
        coordinator.publish(envelope("old", 100), 0);
        coordinator.publish(envelope("live", 10_000), 0);

        let (_, _, replay) = coordinator.subscribe(topic(), subscriber(2), 500);
        let ids: Vec<_> = replay.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["live"]);
    }

    #[test]
    fn unsubscribe_removes_and_versions() {
        let mut coordinator = CoordinatorState::default();
        let (v, _, _) = coordinator.subscribe(topic(), subscriber(1), 0);
        assert!(coordinator.unsubscribe(&topic(), &subscriber(1)));
        assert!(!coordinator.unsubscribe(&topic(), &subscriber(1)));
        let (_, subs, _) = coordinator.subscribe(topic(), subscriber(2), 0);
        assert_eq!(subs, vec![subscriber(2)]);
        assert!(coordinator.persistable(&topic()).unwrap().version > v);
    }

    #[test]
    fn adopt_takes_newer_state_only() {
        let mut coordinator = CoordinatorState::default();
        coordinator.adopt(
            topic(),
            PersistedTopicState {
                version: 7,
                subscribers: vec![subscriber(1)],
            },
        );
        let (version, subs, _) = coordinator.subscribe(topic(), subscriber(2), 0);
        assert_eq!(version, 8);
        assert!(subs.contains(&subscriber(1)));

        // An older snapshot cannot roll the version back.
        coordinator.adopt(
            topic(),
            PersistedTopicState {
                version: 3,
                subscribers: vec![subscriber(3)],
            },
        );
        assert_eq!(coordinator.persistable(&topic()).unwrap().version, 8);
    }

    #[test]
    fn gc_drops_dead_topics() {
        let mut coordinator = CoordinatorState::default();
        coordinator.publish(envelope("m", 100), 0);
        coordinator.gc(500);
        assert!(coordinator.is_empty());
    }
}
