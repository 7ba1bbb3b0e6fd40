//! Pub/sub tunables.

use std::time::Duration;

/// Configuration for joins, retries, and retention.
#[derive(Debug, Clone)]
pub struct PubsubConfig {
    /// Budget for one join attempt (default: 5 s).
    pub join_timeout: Duration,
    /// Budget for one publish attempt (default: 5 s).
    pub publish_timeout: Duration,
    /// Retry cap for retryable join/publish failures (default: 3).
    pub max_retries: u32,
    /// Backoff base (default: 500 ms), doubled per retry.
    pub backoff_base: Duration,
    /// Jitter fraction around the backoff (default: ±25 %).
    pub jitter_frac: f64,
    /// Default message lifetime (default: 10 min).
    pub message_ttl: Duration,
    /// Dedup entry lifetime (default: 10 min; entries also survive
    /// until their message has expired).
    pub dedup_ttl: Duration,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            jitter_frac: 0.25,
            message_ttl: Duration::from_secs(600),
            dedup_ttl: Duration::from_secs(600),
        }
    }
}

impl PubsubConfig {
    /// Fast timings for tests.
    pub fn for_testing() -> Self {
        Self {
            join_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(2),
            max_retries: 3,
            backoff_base: Duration::from_millis(50),
            jitter_frac: 0.25,
            message_ttl: Duration::from_secs(30),
            dedup_ttl: Duration::from_secs(30),
        }
    }
}
