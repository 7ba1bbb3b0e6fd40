//! The bootstrap coordinator process.

mod http;
mod registry;
mod service;

pub use http::serve_http;
pub use registry::{Participant, Registry};
pub use service::{BootstrapServer, ServerConfig, ServerStats};
