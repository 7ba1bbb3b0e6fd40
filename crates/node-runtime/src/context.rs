//! The explicit dependency bundle every component receives.

use shared_bus::InMemoryEventBus;
use shared_types::NodeId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tr_02_transport::ConnectionManager;
use tr_04_bootstrap::BootstrapClient;
use tr_05_dht::DhtNode;
use tr_06_pubsub::{PubsubManager, TopicMessage};
use trellis_telemetry::SafeMetrics;

/// Everything a running node is made of.
///
/// Constructed once by [`crate::wiring::start_node`] and threaded
/// explicitly; there is no process-global node state.
pub struct NodeContext {
    pub node_id: NodeId,
    pub bus: Arc<InMemoryEventBus>,
    pub metrics: SafeMetrics,
    pub transport: ConnectionManager,
    pub dht: DhtNode,
    pub pubsub: PubsubManager,
    pub bootstrap: BootstrapClient,
    /// Pub/sub deliveries to the application.
    pub deliveries: mpsc::Receiver<TopicMessage>,
}

impl NodeContext {
    /// Tear the node down: pub/sub hand-off, DHT tasks, links.
    pub async fn shutdown(&self) {
        self.pubsub.shutdown().await;
        self.dht.shutdown();
        self.bootstrap.shutdown();
        self.transport.shutdown();
    }
}
