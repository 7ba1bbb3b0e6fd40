//! Bootstrap scenarios: genesis election, helper onboarding, the
//! version gate, and the bridge path for NAT-restricted joiners.

use crate::fixtures::*;
use shared_types::{NodeType, PeerMetadata};
use std::time::Duration;
use tr_03_identity::NodeIdentity;
use tr_04_bootstrap::{BootstrapClient, BootstrapError, JoinDirective, Registration};
use tr_05_dht::DhtState;

#[tokio::test(flavor = "multi_thread")]
async fn genesis_is_issued_exactly_once() {
    let (_server, addr) = spawn_coordinator().await;

    // First joiner: elected genesis, running with zero peers.
    let a = spawn_node(server_node_config(&addr)).await;
    assert_eq!(a.dht.state(), DhtState::Running);
    assert_eq!(a.dht.connected_alive(), 0);

    // A store on a network of one succeeds with zero acknowledgements.
    let key = shared_types::NodeId::hash_of("k");
    let acks = a
        .dht
        .store(key, serde_json::json!("v"), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(acks, 0);
    assert_eq!(a.dht.fetch_local(key), Some(serde_json::json!("v")));

    // Second joiner: never genesis; onboarded through A.
    let b = spawn_node(server_node_config(&addr)).await;
    assert_eq!(b.dht.state(), DhtState::Running);
    assert!(b.dht.connected_alive() >= 1);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_joiner_finds_first_through_lookup() {
    let (_server, addr) = spawn_coordinator().await;
    let a = spawn_node(server_node_config(&addr)).await;
    let b = spawn_node(server_node_config(&addr)).await;

    // From A, a lookup for B's id returns B first.
    let found = a.dht.find_node(b.node_id).await.unwrap();
    assert_eq!(found.first().map(|d| d.id), Some(b.node_id));

    // Both sides ended up in each other's tables.
    assert!(a.dht.routing_snapshot().iter().any(|p| p.id == b.node_id));
    assert!(b.dht.routing_snapshot().iter().any(|p| p.id == a.node_id));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn version_gate_refuses_mismatched_client() {
    let (_server, addr) = spawn_coordinator().await;

    let identity = NodeIdentity::generate();
    let mut registration = Registration::new(
        identity.node_id(),
        "dev",
        PeerMetadata::server("127.0.0.1:1"),
    );
    registration.protocol_version = "9.9.9".into();

    let (client, _events) = BootstrapClient::connect(&addr, registration).await.unwrap();
    let result = client.register().await;
    match result {
        Err(e @ BootstrapError::VersionRejected { .. }) => assert!(e.is_fatal()),
        other => panic!("expected version rejection, got {other:?}"),
    }
    client.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn network_empty_without_create_mode() {
    // A coordinator without create-DHT mode has nothing to offer the
    // first joiner.
    let config = tr_04_bootstrap::ServerConfig {
        create_dht: false,
        listen_addr: "127.0.0.1:0".into(),
        http_addr: None,
        ..Default::default()
    };
    let server = tr_04_bootstrap::BootstrapServer::new(NodeIdentity::generate(), config);
    let addr = server.run().await.unwrap().to_string();

    let identity = NodeIdentity::generate();
    let registration = Registration::new(
        identity.node_id(),
        "dev",
        PeerMetadata::server("127.0.0.1:1"),
    );
    let (client, _events) = BootstrapClient::connect(&addr, registration).await.unwrap();
    client.register().await.unwrap();
    let directive = client.request_peers(8).await.unwrap();
    assert_eq!(directive, JoinDirective::NetworkEmpty);
    client.shutdown();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn nat_client_joins_through_bridge() {
    let (_server, addr) = spawn_coordinator().await;

    // A: genesis member. R: bridge. C: NAT-restricted client.
    let a = spawn_node(server_node_config(&addr)).await;
    let r = spawn_node(bridge_node_config(&addr)).await;
    assert!(r.dht.connected_alive() >= 1);

    let c = spawn_node(client_node_config(&addr)).await;
    assert_eq!(c.dht.state(), DhtState::Running);
    assert!(c.dht.connected_alive() >= 1, "client ended isolated");

    // The client's record on the serving side carries its announced
    // type.
    let serving_side = [&a, &r]
        .iter()
        .find_map(|n| {
            n.dht
                .routing_snapshot()
                .into_iter()
                .find(|p| p.id == c.node_id)
        })
        .expect("someone admitted the client");
    assert_eq!(serving_side.metadata.node_type, Some(NodeType::Client));

    a.shutdown().await;
    r.shutdown().await;
    c.shutdown().await;
}
