//! Integration tests for NATS transport
//!
//! Run with: cargo test -p cryptics-middleware --test nats_integration -- --ignored
//! Requires: docker run -p 4222:4222 nats:latest -js

use std::collections::HashMap;

use bytes::Bytes;
use cryptics_middleware::{partition_for_key, NatsTransport, TopicBuilder, Transport};

#[tokio::test]
#[ignore]
async fn test_nats_keyed_roundtrip() {
    let transport = NatsTransport::connect("nats://localhost:4222", 3)
        .await
        .expect("Failed to connect to NATS");

    let topics = TopicBuilder::new("test-env", "avro");
    transport
        .ensure_stream(topics.stream_name(), vec![topics.all().to_string()])
        .await
        .expect("Failed to create stream");

    let topic = topics.topic("trade");
    let mut sub = transport
        .subscribe(&topic)
        .await
        .expect("Failed to subscribe");

    for i in 0..10 {
        transport
            .publish_keyed(&topic, "order-42", Bytes::from(format!("{}", i)), HashMap::new())
            .await
            .expect("Failed to publish");
    }

    for i in 0..10 {
        let msg = sub.next().await.expect("Failed to receive");
        assert_eq!(msg.payload, Bytes::from(format!("{}", i)));
        assert_eq!(msg.key.as_deref(), Some("order-42"));
    }
}

#[tokio::test]
#[ignore]
async fn test_unkeyed_publish_uses_partition_zero() {
    let transport = NatsTransport::connect("nats://localhost:4222", 3)
        .await
        .expect("Failed to connect to NATS");

    let topics = TopicBuilder::new("test-env", "avro");
    let dlq = format!("{}.dlq", topics.topic("ticker"));
    let mut sub = transport.subscribe(&dlq).await.expect("Failed to subscribe");

    transport
        .publish(&dlq, Bytes::from("{}"))
        .await
        .expect("Failed to publish");
    let msg = sub.next().await.expect("Failed to receive");
    assert_eq!(msg.payload, Bytes::from("{}"));
    assert!(partition_for_key("order-42", 3) < 3);
}
