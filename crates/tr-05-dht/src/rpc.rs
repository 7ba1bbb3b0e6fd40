//! Request/response correlation.
//!
//! Every outstanding RPC has a unique request id; replies route back by
//! id. Late replies — after a timeout abandoned the waiter — are
//! discarded at the caller that no longer exists, never applied.

use parking_lot::Mutex;
use shared_types::Frame;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Pending-response registry.
#[derive(Debug, Default)]
pub struct RpcTracker {
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
}

impl RpcTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`.
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Abandon a waiter (timeout or send failure).
    pub fn abandon(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }

    /// Route a reply to its waiter. Returns `false` for unknown ids
    /// (late replies, unsolicited responses).
    pub fn complete(&self, request_id: &str, frame: Frame) -> bool {
        match self.pending.lock().remove(request_id) {
            Some(waiter) => waiter.send(frame).is_ok(),
            None => false,
        }
    }

    /// Outstanding request count.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reply_routes_to_waiter() {
        let tracker = RpcTracker::new();
        let rx = tracker.register("r1");
        assert!(tracker.complete(
            "r1",
            Frame::Pong {
                request_id: "r1".into(),
                ts: 1,
            }
        ));
        assert!(matches!(rx.await.unwrap(), Frame::Pong { .. }));
    }

    #[test]
    fn late_reply_is_discarded() {
        let tracker = RpcTracker::new();
        let rx = tracker.register("r1");
        tracker.abandon("r1");
        drop(rx);
        assert!(!tracker.complete(
            "r1",
            Frame::Pong {
                request_id: "r1".into(),
                ts: 1,
            }
        ));
        assert_eq!(tracker.pending_count(), 0);
    }
}
