use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

use crate::error::TransportError;

/// Header names carried alongside every envelope payload
pub mod headers {
    pub const KEY: &str = "Cryptics-Key";
    pub const MODEL: &str = "Cryptics-Model";
    pub const SCHEMA_VERSION: &str = "Cryptics-Schema-Version";
    pub const PROCESSING_TIMESTAMP: &str = "Cryptics-Processing-Timestamp";

    /// All envelope headers, in the order they are written
    pub const ALL: [&str; 4] = [KEY, MODEL, SCHEMA_VERSION, PROCESSING_TIMESTAMP];
}

/// Message as delivered by a subscription
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Logical topic the message was published to
    pub topic: String,
    /// Partition key, if the message was published keyed
    pub key: Option<String>,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
    /// TSC timestamp taken when the transport handled the message
    pub timestamp: u64,
    pub sequence: Option<u64>,
}

impl TransportMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive next message (blocks until available)
    async fn next(&mut self) -> Result<TransportMessage, TransportError>;

    /// Unsubscribe and close
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

/// Partitioned pub/sub bus.
///
/// Messages published with the same key on the same topic are delivered
/// to a subscriber of that topic in publish order.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish without a partition key
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Publish with a partition key and headers. Returns once the bus has
    /// accepted the message.
    async fn publish_keyed(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Subscribe to every partition of a topic
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError>;
}
