//! # Bootstrap Subsystem
//!
//! How a node gets into the overlay.
//!
//! The **server** is the coordinator process: an in-memory registry of
//! currently connected participants, genesis election for a fresh DHT,
//! helper selection for directly reachable joiners, bridge-mediated
//! onboarding for NAT-restricted joiners, an opaque signalling relay,
//! and a small HTTP health surface. It keeps no routing state beyond
//! the lifetime of its connections.
//!
//! The **client** is the node-side half: one persistent link to the
//! coordinator, registration behind the protocol/build version gate,
//! the peers-or-genesis exchange, signal relay, and — on bridge nodes —
//! answering onboarding queries.

pub mod client;
pub mod errors;
pub mod server;

pub use client::{BootstrapClient, BootstrapEvent, JoinDirective, Registration};
pub use errors::BootstrapError;
pub use server::{BootstrapServer, ServerConfig, ServerStats};
