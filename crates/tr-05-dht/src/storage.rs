//! Local value store with expiry.
//!
//! Holds records this node is responsible for: replicated stores,
//! lookup-path cached values, and coordinator topic state. Bounded by
//! record count; expired records are reaped lazily on access and in the
//! cleanup sweep.

use shared_types::NodeId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredValue {
    value: serde_json::Value,
    expires_at_ms: u64,
}

/// Bounded key→value store.
#[derive(Debug)]
pub struct ValueStore {
    records: HashMap<NodeId, StoredValue>,
    capacity: usize,
}

impl ValueStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            capacity,
        }
    }

    /// Store a record. Returns `false` when at capacity (after reaping
    /// expired entries).
    pub fn put(&mut self, key: NodeId, value: serde_json::Value, expires_at_ms: u64, now_ms: u64) -> bool {
        if expires_at_ms <= now_ms {
            return false;
        }
        if !self.records.contains_key(&key) && self.records.len() >= self.capacity {
            self.gc(now_ms);
            if self.records.len() >= self.capacity {
                return false;
            }
        }
        self.records.insert(
            key,
            StoredValue {
                value,
                expires_at_ms,
            },
        );
        true
    }

    /// Fetch an unexpired record.
    pub fn get(&mut self, key: &NodeId, now_ms: u64) -> Option<serde_json::Value> {
        match self.records.get(key) {
            Some(record) if record.expires_at_ms > now_ms => Some(record.value.clone()),
            Some(_) => {
                self.records.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &NodeId, now_ms: u64) -> bool {
        self.records
            .get(key)
            .map(|r| r.expires_at_ms > now_ms)
            .unwrap_or(false)
    }

    pub fn remove(&mut self, key: &NodeId) -> bool {
        self.records.remove(key).is_some()
    }

    /// Reap expired records. Returns the count removed.
    pub fn gc(&mut self, now_ms: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.expires_at_ms > now_ms);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn put_get_round_trip() {
        let mut store = ValueStore::new(8);
        assert!(store.put(key(1), serde_json::json!("v"), 2000, 1000));
        assert_eq!(store.get(&key(1), 1500), Some(serde_json::json!("v")));
    }

    #[test]
    fn expired_record_is_a_miss_and_reaped() {
        let mut store = ValueStore::new(8);
        store.put(key(1), serde_json::json!("v"), 2000, 1000);
        assert_eq!(store.get(&key(1), 2000), None);
        assert!(store.is_empty());
    }

    #[test]
    fn already_expired_put_is_refused() {
        let mut store = ValueStore::new(8);
        assert!(!store.put(key(1), serde_json::json!("v"), 1000, 1000));
    }

    #[test]
    fn capacity_is_enforced_after_reaping() {
        let mut store = ValueStore::new(2);
        store.put(key(1), serde_json::json!(1), 10_000, 0);
        store.put(key(2), serde_json::json!(2), 500, 0);
        // Full, but key 2 expires by now=1000, so the reap frees a slot.
        assert!(store.put(key(3), serde_json::json!(3), 10_000, 1000));
        // Now genuinely full of live records.
        assert!(!store.put(key(4), serde_json::json!(4), 10_000, 1000));
    }
}
