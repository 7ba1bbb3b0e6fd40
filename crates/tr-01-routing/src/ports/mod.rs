//! Ports: interfaces the routing subsystem requires from its host.

mod outbound;

pub use outbound::{FixedTimeSource, SystemTimeSource, TimeSource};
