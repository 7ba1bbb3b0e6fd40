//! # Shared Types - Wire Frames, Identifiers, Errors
//!
//! The vocabulary every Trellis subsystem speaks:
//!
//! - [`entities`] — 160-bit node identifiers, peer descriptors, metadata
//! - [`frames`] — the tagged JSON frame set exchanged between peers and
//!   with the bootstrap coordinator
//! - [`errors`] — the surfaced error type with category and remediation
//! - [`version`] — protocol/build compatibility gate
//! - [`rate_limiter`] — token bucket limiter for inbound RPC handling
//!
//! Frames are length-delimited JSON objects with a `type` tag; node
//! identifiers travel as 40-character lowercase hex strings and are
//! decoded (never rehashed) at the receiving boundary.

pub mod entities;
pub mod errors;
pub mod frames;
pub mod rate_limiter;
pub mod tokens;
pub mod version;

pub use entities::{
    Distance, NodeId, NodeIdError, NodeType, PeerDescriptor, PeerMetadata, Timestamp,
};
pub use errors::{ErrorCategory, TrellisError};
pub use frames::{
    BootstrapResponseData, BootstrapStatus, Frame, MessageEnvelope, OnboardingPeerData,
    RoutedEnvelope,
};
pub use tokens::{InvitationToken, MembershipToken};
pub use rate_limiter::{KeyedRateLimiter, RateLimiter};
pub use version::{build_ids_compatible, ProtocolVersion, BUILD_ID_FALLBACK};

/// Protocol version string advertised in HELLO and bootstrap registration.
pub const PROTOCOL_VERSION: &str = "1.2.0";

/// Default bucket capacity (k) for the routing layer.
pub const K: usize = 20;

/// Default lookup parallelism (alpha).
pub const ALPHA: usize = 3;
