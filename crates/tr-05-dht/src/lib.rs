//! # DHT Subsystem
//!
//! The Kademlia engine: iterative α-parallel lookups over the routing
//! table, value storage with replication and caching, liveness
//! maintenance with adaptive refresh, and hop-bounded overlay routing
//! for application messages.
//!
//! The [`DhtNode`] consumes peer events from the shared bus (the
//! transport is the only producer), funnels every routing-table
//! mutation through the single-owner routing service, and correlates
//! RPC replies by request id. Frames that are not DHT RPCs — the
//! pub/sub vocabulary — are handed to the application channel
//! untouched.

pub mod config;
pub mod core;
pub mod errors;
pub mod lookup;
pub mod maintenance;
pub mod messaging;
pub mod rpc;
pub mod state;
pub mod storage;

pub use config::DhtConfig;
pub use core::{AppFrame, DhtNode};
pub use errors::DhtError;
pub use state::DhtState;
