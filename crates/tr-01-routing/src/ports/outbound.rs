//! Driven ports: time abstraction.
//!
//! Staleness, eviction, and refresh decisions are all time-based.
//! Injecting the clock keeps every domain test deterministic;
//! production uses the system clock.

use shared_types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Abstract clock.
pub trait TimeSource: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source for production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Settable time source for tests.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    secs: AtomicU64,
}

impl FixedTimeSource {
    pub fn at(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Pin the clock to an absolute time.
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.secs.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_time_source_advances() {
        let time = FixedTimeSource::at(100);
        assert_eq!(time.now(), Timestamp::new(100));
        time.advance(50);
        assert_eq!(time.now(), Timestamp::new(150));
    }
}
