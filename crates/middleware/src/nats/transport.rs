use std::collections::HashMap;

use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::TransportError;
use crate::latency::now_tsc;
use crate::partition::partition_for_key;
use crate::topics::TopicBuilder;
use crate::transport::{headers, Subscription, Transport, TransportMessage};

/// NATS subscription over every partition subject of one topic
struct NatsSubscription {
    topic: String,
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        let msg = self.subscriber.next().await.ok_or(TransportError::Closed)?;

        let mut envelope_headers = HashMap::new();
        if let Some(nats_headers) = msg.headers.as_ref() {
            for name in headers::ALL {
                if let Some(value) = nats_headers.get(name) {
                    envelope_headers.insert(name.to_string(), value.as_str().to_string());
                }
            }
        }
        let key = envelope_headers.get(headers::KEY).cloned();

        Ok(TransportMessage {
            topic: self.topic.clone(),
            key,
            payload: msg.payload,
            headers: envelope_headers,
            timestamp: now_tsc(),
            sequence: None,
        })
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), TransportError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }
}

/// NATS JetStream transport.
///
/// A keyed message for topic T goes to subject "T.p{n}" where n is the
/// key's partition. Publishes wait for the JetStream ack.
pub struct NatsTransport {
    client: Client,
    jetstream: Context,
    partitions: u32,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client, partitions: u32) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            partitions: partitions.max(1),
        }
    }

    /// Connect to NATS server and create transport
    pub async fn connect(url: &str, partitions: u32) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client, partitions))
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Create or get the JetStream stream backing the namespace
    pub async fn ensure_stream(
        &self,
        stream_name: &str,
        subjects: Vec<String>,
    ) -> Result<(), TransportError> {
        let config = Config {
            name: stream_name.to_string(),
            subjects,
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: std::time::Duration::from_secs(7 * 24 * 60 * 60),
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::StreamFailed(e.to_string()))?;

        Ok(())
    }

    async fn publish_subject(
        &self,
        subject: String,
        payload: Bytes,
        envelope_headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let mut nats_headers = async_nats::HeaderMap::new();
        for (k, v) in envelope_headers {
            nats_headers.insert(k, v);
        }

        let ack = self
            .jetstream
            .publish_with_headers(subject, nats_headers, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
        ack.await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.publish_subject(
            TopicBuilder::partition_subject(topic, 0),
            payload,
            HashMap::new(),
        )
        .await
    }

    async fn publish_keyed(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        mut envelope_headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let partition = partition_for_key(key, self.partitions);
        envelope_headers
            .entry(headers::KEY.to_string())
            .or_insert_with(|| key.to_string());
        self.publish_subject(
            TopicBuilder::partition_subject(topic, partition),
            payload,
            envelope_headers,
        )
        .await
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let subscriber = self
            .client
            .subscribe(TopicBuilder::partitions_wildcard(topic))
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        Ok(Box::new(NatsSubscription {
            topic: topic.to_string(),
            subscriber,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running NATS server with JetStream
    // Run: docker run -p 4222:4222 nats:latest -js

    #[tokio::test]
    #[ignore] // Requires NATS server with JetStream
    async fn test_keyed_publish_lands_on_partition_subject() {
        let transport = NatsTransport::connect("nats://localhost:4222", 3)
            .await
            .unwrap();
        transport
            .ensure_stream("CRYPTICS_TEST_AVRO", vec!["cryptics.test.>".to_string()])
            .await
            .unwrap();

        let mut sub = transport.subscribe("cryptics.test.ticker.avro").await.unwrap();
        transport
            .publish_keyed(
                "cryptics.test.ticker.avro",
                "BTC-PERPETUAL",
                Bytes::from("hello"),
                HashMap::new(),
            )
            .await
            .unwrap();

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.key.as_deref(), Some("BTC-PERPETUAL"));
        assert_eq!(msg.payload, Bytes::from("hello"));
    }
}
