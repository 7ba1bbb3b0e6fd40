//! Tracing subscriber setup for the binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "TRELLIS_LOG";

/// Install the global tracing subscriber.
///
/// The filter comes from `TRELLIS_LOG` (standard `EnvFilter` syntax),
/// defaulting to `info`. Safe to call more than once; only the first
/// installation wins.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
