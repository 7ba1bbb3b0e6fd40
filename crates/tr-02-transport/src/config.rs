//! Transport configuration.

use std::time::Duration;

/// Tunables for the connection plane.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum concurrent peer connections (default: 50).
    pub max_connections: usize,

    /// Outbound frames buffered per peer before drops (default: 64).
    pub send_buffer_frames: usize,

    /// Keep-alive interval while the session is active (default: 60 s).
    pub keepalive_interval: Duration,

    /// Keep-alive interval while backgrounded (default: 300 s).
    pub keepalive_relaxed_interval: Duration,

    /// Consecutive missed keep-alive replies before disconnect
    /// (default: 3).
    pub keepalive_miss_cap: u32,

    /// Dial timeout (default: 5 s).
    pub connect_timeout: Duration,

    /// New links are protected from cap eviction this long
    /// (default: 60 s).
    pub eviction_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            send_buffer_frames: 64,
            keepalive_interval: Duration::from_secs(60),
            keepalive_relaxed_interval: Duration::from_secs(300),
            keepalive_miss_cap: 3,
            connect_timeout: Duration::from_secs(5),
            eviction_grace: Duration::from_secs(60),
        }
    }
}

impl TransportConfig {
    /// Short intervals for tests.
    pub fn for_testing() -> Self {
        Self {
            max_connections: 8,
            send_buffer_frames: 8,
            keepalive_interval: Duration::from_millis(200),
            keepalive_relaxed_interval: Duration::from_millis(800),
            keepalive_miss_cap: 3,
            connect_timeout: Duration::from_secs(2),
            eviction_grace: Duration::from_millis(100),
        }
    }
}
