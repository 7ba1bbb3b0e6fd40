//! Shared fixtures: a coordinator plus nodes on loopback.

use node_runtime::{start_node, NodeConfig, NodeContext};
use shared_types::NodeType;
use tr_03_identity::NodeIdentity;
use tr_04_bootstrap::{BootstrapServer, ServerConfig};

/// Spin up a coordinator in create-DHT mode on an ephemeral port.
/// Returns the server handle and its protocol address.
pub async fn spawn_coordinator() -> (BootstrapServer, String) {
    let config = ServerConfig {
        create_dht: true,
        listen_addr: "127.0.0.1:0".into(),
        http_addr: None,
        ..ServerConfig::default()
    };
    let server = BootstrapServer::new(NodeIdentity::generate(), config);
    let bound = server.run().await.expect("coordinator bind");
    (server, bound.to_string())
}

/// Config for a server-style node joining `bootstrap_addr`.
pub fn server_node_config(bootstrap_addr: &str) -> NodeConfig {
    NodeConfig {
        bootstrap_addr: bootstrap_addr.to_string(),
        listen_addr: Some("127.0.0.1:0".into()),
        datagram_bind: Some("127.0.0.1:0".into()),
        node_type: NodeType::Server,
        ..NodeConfig::default()
    }
}

/// Config for a NAT-restricted client-style node.
pub fn client_node_config(bootstrap_addr: &str) -> NodeConfig {
    NodeConfig {
        bootstrap_addr: bootstrap_addr.to_string(),
        listen_addr: None,
        datagram_bind: Some("127.0.0.1:0".into()),
        node_type: NodeType::Client,
        ..NodeConfig::default()
    }
}

/// Config for a bridge node.
pub fn bridge_node_config(bootstrap_addr: &str) -> NodeConfig {
    NodeConfig {
        bootstrap_addr: bootstrap_addr.to_string(),
        listen_addr: Some("127.0.0.1:0".into()),
        datagram_bind: Some("127.0.0.1:0".into()),
        node_type: NodeType::Bridge,
        is_bridge: true,
        ..NodeConfig::default()
    }
}

/// Start a node, panicking with context on failure.
pub async fn spawn_node(config: NodeConfig) -> NodeContext {
    start_node(config).await.expect("node start")
}
