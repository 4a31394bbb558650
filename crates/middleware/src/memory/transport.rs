use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::latency::now_tsc;
use crate::transport::{Subscription, Transport, TransportMessage};

const CHANNEL_BUFFER_SIZE: usize = 4096;

/// One ordered channel per topic. Subscribers only see messages published
/// after they subscribed.
pub struct InMemoryTransport {
    channels: DashMap<String, broadcast::Sender<TransportMessage>>,
    sequence: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    #[inline]
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn get_or_create_channel(&self, topic: &str) -> broadcast::Sender<TransportMessage> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .clone()
    }

    fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) {
        let tx = self.get_or_create_channel(topic);
        let msg = TransportMessage {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload,
            headers,
            timestamp: now_tsc(),
            sequence: Some(self.next_sequence()),
        };
        // No receivers is not an error: the bus accepted the message.
        let _ = tx.send(msg);
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<TransportMessage>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => TransportError::Closed,
            broadcast::error::RecvError::Lagged(n) => TransportError::Lagged(n),
        })
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.send(topic, None, payload, HashMap::new());
        Ok(())
    }

    async fn publish_keyed(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        self.send(topic, Some(key), payload, headers);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let tx = self.get_or_create_channel(topic);
        let rx = tx.subscribe();
        Ok(Box::new(InMemorySubscription { rx }))
    }
}
