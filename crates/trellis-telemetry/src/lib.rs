//! # Trellis Telemetry
//!
//! Metrics and log plumbing for the node and bootstrap runtimes.
//!
//! The core calls telemetry through [`SafeMetrics`], a wrapper with one
//! hard guarantee: a telemetry failure can never take the overlay down.
//! Construction failures yield a no-op instance; the first runtime
//! failure flips a disable flag and every later call returns
//! immediately. Disabling metrics is observationally identical to
//! running with a no-op implementation.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::SafeMetrics;
