//! Token bucket rate limiting for inbound RPC handling.
//!
//! A flooding peer should never starve the event loop or force the
//! routing table to churn. Each peer gets its own bucket; sustained
//! excess is reported to the caller so it can count a failure or ban.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Token bucket rate limiter.
///
/// Tokens refill at a fixed rate; each request consumes one; requests
/// are rejected when the bucket is empty.
pub struct RateLimiter {
    /// Maximum tokens in the bucket (burst size).
    capacity: u64,
    /// Tokens added per second.
    refill_rate: u64,
    /// Current token count.
    tokens: AtomicU64,
    /// Last refill time.
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: AtomicU64::new(capacity),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// Try to acquire a token. Returns `false` when rate limited.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn refill(&self) {
        let mut last = match self.last_refill.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.duration_since(*last);

        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;
        if tokens_to_add > 0 {
            *last = now;
            loop {
                let current = self.tokens.load(Ordering::Relaxed);
                let new_value = (current + tokens_to_add).min(self.capacity);
                if self
                    .tokens
                    .compare_exchange(current, new_value, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Current available tokens.
    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Relaxed)
    }
}

/// Per-key rate limiting with lazily created buckets.
///
/// Used for per-peer inbound RPC limits: key by node id, one bucket per
/// peer. `remove` drops a bucket when a peer disconnects.
pub struct KeyedRateLimiter<K: Eq + Hash + Clone> {
    capacity: u64,
    refill_rate: u64,
    buckets: Mutex<HashMap<K, RateLimiter>>,
}

impl<K: Eq + Hash + Clone> KeyedRateLimiter<K> {
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity,
            refill_rate,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Try to acquire a token for `key`, creating its bucket on first use.
    pub fn try_acquire(&self, key: &K) -> bool {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets
            .entry(key.clone())
            .or_insert_with(|| RateLimiter::new(self.capacity, self.refill_rate))
            .try_acquire()
    }

    /// Drop the bucket for a departed key.
    pub fn remove(&self, key: &K) {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.remove(key);
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pre-configured limiters for overlay RPC classes.
pub mod presets {
    use super::KeyedRateLimiter;
    use crate::entities::NodeId;

    /// Inbound DHT RPCs per peer (20 req/sec, burst 40).
    pub fn inbound_rpc() -> KeyedRateLimiter<NodeId> {
        KeyedRateLimiter::new(40, 20)
    }

    /// Pub/sub publishes per peer (5 req/sec, burst 10).
    pub fn publish() -> KeyedRateLimiter<NodeId> {
        KeyedRateLimiter::new(10, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_up_to_capacity_then_reject() {
        let limiter = RateLimiter::new(3, 1);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn keyed_buckets_are_independent() {
        let limiter = KeyedRateLimiter::new(1, 1);
        assert!(limiter.try_acquire(&"a"));
        assert!(!limiter.try_acquire(&"a"));
        assert!(limiter.try_acquire(&"b"));
    }

    #[test]
    fn removed_key_gets_fresh_bucket() {
        let limiter = KeyedRateLimiter::new(1, 0);
        assert!(limiter.try_acquire(&"peer"));
        assert!(!limiter.try_acquire(&"peer"));
        limiter.remove(&"peer");
        assert!(limiter.try_acquire(&"peer"));
    }
}
