//! Routing table statistics and health warnings.

/// Snapshot of table health, taken on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableStats {
    /// Total peers across all buckets.
    pub total_peers: usize,
    /// Peers with an active connection.
    pub connected_peers: usize,
    /// Non-empty buckets.
    pub buckets_used: usize,
    /// Total buckets after splitting.
    pub bucket_count: usize,
    /// Active bans.
    pub banned_count: usize,
    /// Age in seconds of the oldest entry's last sighting.
    pub oldest_peer_age_secs: u64,
    /// Health warnings derived from the snapshot.
    pub warnings: Vec<TableWarning>,
}

/// Conditions worth surfacing to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableWarning {
    /// Fewer peers than half a bucket; lookups will be shallow.
    TooFewPeers,
    /// Nothing heard from any peer recently.
    NoRecentActivity,
    /// No connected peer at all; the node is isolated.
    Isolated,
}

impl std::fmt::Display for TableWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPeers => write!(f, "too few peers"),
            Self::NoRecentActivity => write!(f, "no recent activity"),
            Self::Isolated => write!(f, "no connected peers"),
        }
    }
}
