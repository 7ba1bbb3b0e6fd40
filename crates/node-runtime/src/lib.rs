//! # Trellis Node Runtime
//!
//! Wiring for the overlay node: identity, transport, DHT, pub/sub, and
//! the bootstrap join flow, threaded through an explicit
//! [`NodeContext`]. The only process-wide singleton in the whole system
//! is the bootstrap coordinator's registry — and that lives in the
//! coordinator binary, not here.

pub mod config;
pub mod context;
pub mod signalling;
pub mod wiring;

pub use config::NodeConfig;
pub use context::NodeContext;
pub use wiring::start_node;
