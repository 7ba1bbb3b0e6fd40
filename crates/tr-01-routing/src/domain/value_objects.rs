//! Configuration values for the routing layer.

/// Number of bits in a node identifier.
pub const ID_BITS: usize = 160;

/// Configuration constants for the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Bucket capacity (default: 20).
    pub k: usize,
    /// Lookup parallelism factor (default: 3).
    pub alpha: usize,
    /// Entries idle longer than this are stale (default: 15 minutes).
    pub stale_after_secs: u64,
    /// Failures before a peer counts as dead (default: 3).
    pub failure_cap: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            k: shared_types::K,
            alpha: shared_types::ALPHA,
            stale_after_secs: 15 * 60,
            failure_cap: 3,
        }
    }
}

impl RoutingConfig {
    /// Smaller values for fast, splitting-heavy tests.
    pub fn for_testing() -> Self {
        Self {
            k: 3,
            alpha: 2,
            stale_after_secs: 60,
            failure_cap: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = RoutingConfig::default();
        assert_eq!(config.k, 20);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.stale_after_secs, 900);
        assert_eq!(config.failure_cap, 3);
    }
}
