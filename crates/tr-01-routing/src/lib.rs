//! # Routing Subsystem
//!
//! The Kademlia routing core for the Trellis overlay: XOR distance
//! services, k-buckets with LRU semantics and splitting, the routing
//! table, and per-peer state (liveness, RTT, quality score).
//!
//! ## Architecture
//!
//! - **Domain layer:** pure routing logic, no I/O
//! - **Ports layer:** time source abstraction for deterministic tests
//! - **Service layer:** the single-owner wrapper everything mutates
//!   through; readers take snapshots
//!
//! The routing table never stores connection handles. It holds peer
//! identifiers and metadata snapshots; the transport owns the links and
//! reports lifecycle over the event bus.

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{
    bucket_index, random_id_in_bucket, sort_by_distance, AddOutcome, BanReason, KBucket,
    PeerRecord, RoutingConfig, RoutingError, RoutingTable, RoutingTableStats, TableWarning,
};
pub use ports::{FixedTimeSource, SystemTimeSource, TimeSource};
pub use service::RoutingService;
