//! # Pub/Sub Subsystem
//!
//! Topic-based publish/subscribe over the DHT. Each topic has exactly
//! one coordinator at a time: the live peer whose id is XOR-closest to
//! the hashed topic id. Subscribers join through the coordinator and
//! receive pushes over the overlay routing layer; publications are
//! versioned, deduplicated by message id, and replayed (the unexpired
//! slice) to late joiners.
//!
//! Joins deduplicate concurrent callers, retry with jittered
//! exponential backoff on retryable failures, and refuse to start at
//! all while the DHT is not running or the node has no peers — those
//! failures carry remediation hints, not just a category.

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod errors;
pub mod manager;
pub mod types;

pub use config::PubsubConfig;
pub use errors::PubsubError;
pub use manager::{PubsubManager, TopicMessage};
pub use types::{ExpiryRetention, RetentionPolicy, SubscribeOutcome};
