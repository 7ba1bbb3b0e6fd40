//! # Transport Subsystem
//!
//! The connection plane: one [`ConnectionManager`] unifying two
//! transport families behind a single capability set.
//!
//! - **Stream transport** — a TCP connection to a peer's published
//!   listening address. Server-style nodes are reached this way.
//! - **Datagram transport** — a UDP peer channel for NAT-restricted
//!   participants, established after an opaque signalling exchange
//!   relayed by the bootstrap link or an existing DHT peer.
//!
//! Both carry the same length-delimited JSON frames (one frame per
//! datagram on UDP). Immediately after a transport opens, both sides
//! exchange `HELLO` and gate on protocol/build compatibility; the
//! announced metadata is installed before anything else flows.
//!
//! The manager owns every connection handle. Everything above it sees
//! only [`shared_bus::PeerEvent`]s and the send/disconnect calls here.

pub mod config;
pub mod datagram;
pub mod errors;
pub mod framing;
pub mod hello;
pub mod manager;
pub mod stream;

pub use config::TransportConfig;
pub use errors::TransportError;
pub use manager::{ConnectionManager, LinkStats};
