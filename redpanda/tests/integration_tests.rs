//! Integration tests for [`RedpandaBroker`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/consume round trip of raw envelope bodies
//! - Settled deliveries are committed and not seen again by the group
//! - A full request/reply exchange between two nodes
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p onboarding-rpc-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use onboarding_rpc_core::broker::MessageBroker;
use onboarding_rpc_core::payload::Payload;
use onboarding_rpc_redpanda::RedpandaBroker;
use onboarding_rpc_runtime::{DispatchTable, RpcNode};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_kafka_ready(&brokers).await;
    (kafka, brokers)
}

/// Helper to wait for Kafka to be ready
async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(broker) = RedpandaBroker::new(brokers) {
            if broker.publish("warmup-topic", b"{}").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

/// Publish to `topic` until it exists, then wait for metadata to propagate.
async fn ensure_topic_exists(broker: &RedpandaBroker, topic: &str) {
    for attempt in 1..=30 {
        if broker.publish(topic, b"warmup").await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != 30, "Failed to create topic {topic}");
    }
}

#[tokio::test]
#[ignore]
async fn test_publish_and_consume_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = RedpandaBroker::new(&brokers).expect("Failed to create broker");
    ensure_topic_exists(&broker, "employee-service").await;

    let mut deliveries = broker
        .consume("employee-service")
        .await
        .expect("Failed to consume");

    broker
        .publish("employee-service", br#"{"id":"1","message_type":"ping"}"#)
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let delivery = deliveries.next().await.expect("stream ended").expect("delivery failed");
            let body = delivery.body().to_vec();
            delivery.ack().expect("ack failed");
            if body != b"warmup" {
                return body;
            }
        }
    })
    .await
    .expect("Timeout waiting for message");

    assert_eq!(received, br#"{"id":"1","message_type":"ping"}"#.to_vec());
}

#[tokio::test]
#[ignore]
async fn test_settled_messages_are_not_redelivered_to_group() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = RedpandaBroker::builder()
        .brokers(&brokers)
        .consumer_group("commit-test")
        .build()
        .expect("Failed to create broker");
    ensure_topic_exists(&broker, "commit-queue").await;

    broker.publish("commit-queue", b"first").await.unwrap();
    broker.publish("commit-queue", b"second").await.unwrap();

    {
        let mut deliveries = broker.consume("commit-queue").await.unwrap();
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(15), async {
            while seen.len() < 3 {
                let delivery = deliveries.next().await.unwrap().unwrap();
                seen.push(delivery.body().to_vec());
                // Reject commits too: a rejected message is gone for good.
                if delivery.body() == b"second" {
                    delivery.reject().unwrap();
                } else {
                    delivery.ack().unwrap();
                }
            }
        })
        .await
        .expect("Timeout waiting for messages");
        // Let the async commits land before the consumer goes away.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    broker.publish("commit-queue", b"third").await.unwrap();
    let mut deliveries = broker.consume("commit-queue").await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(20), deliveries.next())
        .await
        .expect("Timeout waiting for message")
        .unwrap()
        .unwrap();
    assert_eq!(next.body(), b"third");
}

#[tokio::test]
#[ignore]
async fn test_request_reply_between_nodes() {
    let (_kafka, brokers) = start_kafka().await;
    let broker: Arc<dyn MessageBroker> =
        Arc::new(RedpandaBroker::new(&brokers).expect("Failed to create broker"));
    let redpanda = RedpandaBroker::new(&brokers).expect("Failed to create broker");
    ensure_topic_exists(&redpanda, "onboarding-service").await;
    ensure_topic_exists(&redpanda, "echo-service").await;

    let echo = DispatchTable::new().route("echo", |payload: Payload| async move {
        Ok::<_, String>(payload)
    });
    let responder = RpcNode::start(Arc::clone(&broker), "echo-service", echo, 16)
        .await
        .unwrap();
    let caller = RpcNode::start(Arc::clone(&broker), "onboarding-service", DispatchTable::new(), 16)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut payload = Payload::new();
    payload.insert("n".to_string(), serde_json::json!(7));
    let reply = caller
        .client()
        .call("echo-service", "echo", payload.clone(), Duration::from_secs(20))
        .await
        .expect("call failed");

    assert_eq!(reply, payload);
    caller.shutdown(Duration::from_secs(5)).await;
    responder.shutdown(Duration::from_secs(5)).await;
}
