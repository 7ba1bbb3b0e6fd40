//! DHT protocol constants.

use std::time::Duration;

/// Tunables for the DHT engine. Defaults are the protocol constants.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Bucket size and lookup result width (default: 20).
    pub k: usize,
    /// Lookup parallelism (default: 3).
    pub alpha: usize,
    /// Replication factor for stores (default: 3).
    pub replicate: usize,
    /// Refresh interval while under-connected or newly joined
    /// (default: 120 s).
    pub refresh_aggressive: Duration,
    /// Refresh interval in steady state (default: 1800 s).
    pub refresh_standard: Duration,
    /// Liveness probe interval (default: 300 s).
    pub ping_interval: Duration,
    /// Routine bucket maintenance cadence (default: 180 s).
    pub bucket_maintenance: Duration,
    /// Stale cleanup cadence (default: 300 s).
    pub stale_cleanup: Duration,
    /// Minimum spacing between FIND_NODE sends to one peer
    /// (default: 5 s).
    pub find_node_spacing: Duration,
    /// Whole-lookup budget (default: 5 s).
    pub lookup_timeout: Duration,
    /// Per-query budget within a round (default: 2 s).
    pub round_timeout: Duration,
    /// Per-query budget for inactive (hidden-tab) peers (default: 1 s).
    pub fast_timeout: Duration,
    /// Iteration cap for a single lookup (default: 8 rounds).
    pub max_rounds: usize,
    /// Hop budget for routed overlay messages (default: 8).
    pub hop_budget: u32,
    /// Dedup window for routed messages (default: 60 s).
    pub routed_dedup_window: Duration,
    /// How long a node is considered newly joined (default: 300 s).
    pub newly_joined_window: Duration,
    /// Local value store capacity (default: 4096 records).
    pub storage_capacity: usize,
    /// Per-peer failure backoff base (default: 1 s) and cap
    /// (default: 60 s).
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: shared_types::K,
            alpha: shared_types::ALPHA,
            replicate: 3,
            refresh_aggressive: Duration::from_secs(120),
            refresh_standard: Duration::from_secs(1800),
            ping_interval: Duration::from_secs(300),
            bucket_maintenance: Duration::from_secs(180),
            stale_cleanup: Duration::from_secs(300),
            find_node_spacing: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(5),
            round_timeout: Duration::from_secs(2),
            fast_timeout: Duration::from_secs(1),
            max_rounds: 8,
            hop_budget: 8,
            routed_dedup_window: Duration::from_secs(60),
            newly_joined_window: Duration::from_secs(300),
            storage_capacity: 4096,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl DhtConfig {
    /// Aggressive timings for integration tests.
    pub fn for_testing() -> Self {
        Self {
            k: 20,
            alpha: 3,
            replicate: 3,
            refresh_aggressive: Duration::from_millis(500),
            refresh_standard: Duration::from_secs(5),
            ping_interval: Duration::from_millis(500),
            bucket_maintenance: Duration::from_millis(500),
            stale_cleanup: Duration::from_millis(500),
            find_node_spacing: Duration::from_millis(10),
            lookup_timeout: Duration::from_secs(5),
            round_timeout: Duration::from_secs(1),
            fast_timeout: Duration::from_millis(300),
            max_rounds: 8,
            hop_budget: 8,
            routed_dedup_window: Duration::from_secs(10),
            newly_joined_window: Duration::from_secs(60),
            storage_capacity: 256,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(2),
        }
    }
}
