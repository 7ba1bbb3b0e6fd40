//! Pub/sub end-to-end: delivery, dedup, concurrent joins, gating.

use crate::fixtures::*;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread")]
async fn publish_reaches_subscriber_exactly_once() {
    let (_server, addr) = spawn_coordinator().await;
    let mut a = spawn_node(server_node_config(&addr)).await;
    let b = spawn_node(server_node_config(&addr)).await;
    let c = spawn_node(server_node_config(&addr)).await;

    let outcome = a.pubsub.subscribe("demo").await.unwrap();
    assert!(outcome.subscribers.contains(&a.node_id));

    let message_id = b
        .pubsub
        .publish("demo", serde_json::json!({"text": "hello overlay"}))
        .await
        .unwrap();

    let delivered = timeout(Duration::from_secs(5), a.deliveries.recv())
        .await
        .expect("push arrived within the join timeout")
        .expect("delivery channel open");
    assert_eq!(delivered.envelope.message_id, message_id);
    assert_eq!(delivered.envelope.publisher_id, b.node_id);
    assert_eq!(
        delivered.envelope.payload,
        serde_json::json!({"text": "hello overlay"})
    );

    // No surprise second delivery of the same publication.
    let second = timeout(Duration::from_millis(800), a.deliveries.recv()).await;
    assert!(second.is_err(), "duplicate delivery: {second:?}");

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn late_subscriber_replays_history() {
    let (_server, addr) = spawn_coordinator().await;
    let a = spawn_node(server_node_config(&addr)).await;
    let b = spawn_node(server_node_config(&addr)).await;

    b.pubsub
        .publish("history", serde_json::json!("first"))
        .await
        .unwrap();
    // Give the coordinator a beat to retain it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = a.pubsub.subscribe("history").await.unwrap();
    assert!(
        outcome
            .recent_messages
            .iter()
            .any(|m| m.payload == serde_json::json!("first")),
        "replay missing the earlier publication: {:?}",
        outcome.recent_messages
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_joins_deduplicate() {
    let (_server, addr) = spawn_coordinator().await;
    let a = spawn_node(server_node_config(&addr)).await;
    let b = spawn_node(server_node_config(&addr)).await;

    let (first, second) = tokio::join!(a.pubsub.subscribe("same"), a.pubsub.subscribe("same"));
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.version, second.version);
    assert_eq!(first.subscribers, second.subscribers);
    assert!(
        first.concurrent || second.concurrent,
        "one caller must have ridden the in-flight join"
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn join_is_gated_on_network_health() {
    let (_server, addr) = spawn_coordinator().await;
    // A genesis node has zero peers: joins must refuse with
    // remediation rather than hang.
    let a = spawn_node(server_node_config(&addr)).await;

    let error = a.pubsub.subscribe("gated").await.unwrap_err();
    let surfaced: shared_types::TrellisError = error.into();
    assert_eq!(
        surfaced.category,
        shared_types::ErrorCategory::NetworkIsolated
    );
    assert!(!surfaced.remediation.is_empty());

    a.shutdown().await;
}
