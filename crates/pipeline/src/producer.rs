//! Producer Core: serialize, stamp, and publish model instances.
//!
//! One envelope per successful call, none on failure. Instances that do
//! not satisfy the current schema are dropped and routed to the binding's
//! dead-letter topic; publish failures are retried with bounded backoff and
//! then surfaced to the caller.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cryptics_metadata::TopicBinding;
use cryptics_middleware::latency::{elapsed_since, now_tsc};
use cryptics_middleware::{headers, Clock, Transport};
use cryptics_schema::{codec, Model, SchemaError, SchemaRegistry};
use serde_json::{json, Value as JsonValue};
use tokio::select;
use tokio::sync::{watch, OnceCell};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::ProducerError;
use crate::metrics::ProducerMetrics;
use crate::registry::ProducerContext;

pub struct Producer<M: Model> {
    transport: Arc<dyn Transport>,
    registry: Arc<dyn SchemaRegistry>,
    clock: Arc<dyn Clock>,
    binding: TopicBinding,
    backoff: Backoff,
    schema_id: OnceCell<u32>,
    metrics: ProducerMetrics,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Producer<M> {
    pub fn new(ctx: ProducerContext) -> Self {
        let (settings, clamped) = ctx.settings.validated();
        if clamped {
            warn!(model = M::NAME, max_attempts = settings.max_attempts, "producer retry settings clamped");
        }
        Self {
            transport: ctx.transport,
            registry: ctx.registry,
            clock: ctx.clock,
            binding: ctx.binding,
            backoff: Backoff::for_producer(&settings),
            schema_id: OnceCell::new(),
            metrics: ProducerMetrics::new(M::NAME),
            _model: PhantomData,
        }
    }

    /// Serialize `instance` against the current schema, stamp
    /// `processing_timestamp`, and publish it keyed by `key`
    pub async fn produce(&self, key: &str, mut instance: M) -> Result<(), ProducerError> {
        let start = now_tsc();
        let schema_id = self.schema_id().await?;
        let current = M::schemas().current();

        let processing_timestamp = self.clock.now();
        instance.set_processing_timestamp(processing_timestamp);

        let datum = match codec::encode(&instance, current) {
            Ok(datum) => datum,
            Err(e) => {
                let payload = serde_json::to_value(&instance).unwrap_or(JsonValue::Null);
                return Err(self.reject(key, payload, e).await);
            }
        };
        let payload = Bytes::from(codec::frame(schema_id, &datum));

        let mut envelope_headers = HashMap::with_capacity(headers::ALL.len());
        envelope_headers.insert(headers::KEY.to_string(), key.to_string());
        envelope_headers.insert(headers::MODEL.to_string(), M::NAME.to_string());
        envelope_headers.insert(
            headers::SCHEMA_VERSION.to_string(),
            current.version().to_string(),
        );
        envelope_headers.insert(
            headers::PROCESSING_TIMESTAMP.to_string(),
            processing_timestamp.to_string(),
        );

        self.publish_with_retry(key, payload, envelope_headers).await?;
        self.metrics.inc_produced();
        self.metrics
            .observe_publish_duration(elapsed_since(start).as_secs_f64());
        debug!(model = M::NAME, key = %key, schema_id, "envelope published");
        Ok(())
    }

    async fn schema_id(&self) -> Result<u32, ProducerError> {
        self.schema_id
            .get_or_try_init(|| self.register_all())
            .await
            .copied()
    }

    /// Register every version oldest first so the registry's compatibility
    /// check sees the whole chain; the current version's id is returned.
    async fn register_all(&self) -> Result<u32, ProducerError> {
        let subject = self.binding.value_subject();
        let mut id = 0;
        for schema in M::schemas().all() {
            id = self.registry.register(&subject, schema.document()).await?;
            debug!(model = M::NAME, subject = %subject, version = schema.version(), id, "schema version registered");
        }
        info!(
            model = M::NAME,
            subject = %subject,
            version = M::schemas().current().version(),
            schema_id = id,
            "schema registered"
        );
        Ok(id)
    }

    async fn publish_with_retry(
        &self,
        key: &str,
        payload: Bytes,
        envelope_headers: HashMap<String, String>,
    ) -> Result<(), ProducerError> {
        let topic = &self.binding.topic;
        let mut attempt = 1;
        loop {
            match self
                .transport
                .publish_keyed(topic, key, payload.clone(), envelope_headers.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.backoff.max_attempts() => {
                    error!(model = M::NAME, topic = %topic, key = %key, attempts = attempt, error = %e, "publish failed");
                    self.metrics.inc_failed("publish");
                    return Err(ProducerError::Publish {
                        topic: topic.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(model = M::NAME, topic = %topic, attempt, delay_ms = delay.as_millis() as u64, error = %e, "publish failed, retrying");
                    self.metrics.inc_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Drop a message that failed serialization: count it, dead-letter it,
    /// and hand back the error for the caller
    async fn reject(&self, key: &str, payload: JsonValue, err: SchemaError) -> ProducerError {
        warn!(model = M::NAME, key = %key, error = %err, "dropping message that does not satisfy its schema");
        self.metrics.inc_failed("serialization");

        let dead_letter_topic = self.binding.dead_letter_topic();
        let record = json!({
            "model": M::NAME,
            "key": key,
            "topic": self.binding.topic,
            "error": err.to_string(),
            "failed_at": self.clock.now(),
            "payload": payload,
        });
        match serde_json::to_vec(&record) {
            Ok(body) => match self.transport.publish(&dead_letter_topic, Bytes::from(body)).await {
                Ok(()) => self.metrics.inc_dead_letter(),
                Err(e) => {
                    warn!(model = M::NAME, topic = %dead_letter_topic, error = %e, "dead-letter publish failed")
                }
            },
            Err(e) => warn!(model = M::NAME, error = %e, "dead-letter record not encodable"),
        }
        ProducerError::Serialization(err)
    }
}

/// Model-erased producer, as stored by the component registry
#[async_trait]
pub trait DynProducer: Send + Sync {
    fn model(&self) -> &'static str;

    fn binding(&self) -> &TopicBinding;

    /// Make sure every schema version is registered; returns the current id
    async fn register_schema(&self) -> Result<u32, ProducerError>;

    /// Produce an instance given as JSON. A value that does not deserialize
    /// into the model is a serialization error.
    async fn produce_json(&self, key: &str, value: JsonValue) -> Result<(), ProducerError>;

    /// Generate a synthetic instance and produce it under its own key
    async fn generate_and_produce(&self) -> Result<(), ProducerError>;

    /// Produce synthetic instances every `period` until shutdown.
    /// Returns the number produced.
    async fn run_synthetic(&self, period: Duration, shutdown: watch::Receiver<bool>) -> u64;
}

#[async_trait]
impl<M: Model> DynProducer for Producer<M> {
    fn model(&self) -> &'static str {
        M::NAME
    }

    fn binding(&self) -> &TopicBinding {
        &self.binding
    }

    async fn register_schema(&self) -> Result<u32, ProducerError> {
        self.schema_id().await
    }

    async fn produce_json(&self, key: &str, value: JsonValue) -> Result<(), ProducerError> {
        match serde_json::from_value::<M>(value.clone()) {
            Ok(instance) => self.produce(key, instance).await,
            Err(e) => {
                let err = SchemaError::Serialization {
                    model: M::NAME.to_string(),
                    version: M::schemas().current().version(),
                    reason: e.to_string(),
                };
                Err(self.reject(key, value, err).await)
            }
        }
    }

    async fn generate_and_produce(&self) -> Result<(), ProducerError> {
        let instance = {
            let mut rng = rand::rng();
            M::generate(&mut rng)
        };
        let key = instance.key().to_string();
        self.produce(&key, instance).await
    }

    async fn run_synthetic(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut produced = 0u64;
        info!(model = M::NAME, period_ms = period.as_millis() as u64, "synthetic producer started");

        loop {
            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(model = M::NAME, produced, "synthetic producer stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.generate_and_produce().await {
                        Ok(()) => produced += 1,
                        Err(e) => warn!(model = M::NAME, error = %e, "synthetic produce failed"),
                    }
                }
            }
        }
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptics_metadata::ProducerConfig;
    use cryptics_middleware::{InMemoryTransport, ManualClock, Subscription, TransportError};
    use cryptics_schema::{Ack, CompatibilityLevel, InMemorySchemaRegistry, Ticker};
    use std::sync::atomic::{AtomicU32, Ordering};

    const TOPIC: &str = "cryptics.thalex.ticker.avro";

    fn binding() -> TopicBinding {
        TopicBinding::new("ticker", TOPIC, "ticker_data")
    }

    fn settings(max_attempts: u32) -> ProducerConfig {
        ProducerConfig {
            max_attempts,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
            ..ProducerConfig::default()
        }
    }

    fn context(
        transport: Arc<dyn Transport>,
        registry: Arc<InMemorySchemaRegistry>,
        binding: TopicBinding,
    ) -> ProducerContext {
        ProducerContext {
            transport,
            registry,
            clock: Arc::new(ManualClock::new(1000.05)),
            binding,
            settings: settings(3),
        }
    }

    fn ticker(instrument: &str) -> Ticker {
        let mut ticker = Ticker::generate(&mut rand::rng());
        ticker.instrument_name = instrument.to_string();
        ticker.mark_timestamp = 1000.0;
        ticker.processing_timestamp = None;
        ticker
    }

    async fn next(sub: &mut Box<dyn Subscription>) -> Option<cryptics_middleware::TransportMessage> {
        tokio::time::timeout(Duration::from_millis(100), sub.next())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Transport that fails the first `failures` keyed publishes
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        inner: InMemoryTransport,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                inner: InMemoryTransport::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
            self.inner.publish(topic, payload).await
        }

        async fn publish_keyed(
            &self,
            topic: &str,
            key: &str,
            payload: Bytes,
            headers: HashMap<String, String>,
        ) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(TransportError::PublishFailed("broker unavailable".to_string()));
            }
            self.inner.publish_keyed(topic, key, payload, headers).await
        }

        async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, TransportError> {
            self.inner.subscribe(topic).await
        }
    }

    #[tokio::test]
    async fn test_produce_publishes_stamped_envelope() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(InMemorySchemaRegistry::default());
        let producer: Producer<Ticker> =
            Producer::new(context(transport.clone(), registry.clone(), binding()));
        let mut sub = transport.subscribe(TOPIC).await.unwrap();

        producer
            .produce("BTC-PERPETUAL", ticker("BTC-PERPETUAL"))
            .await
            .unwrap();

        let msg = next(&mut sub).await.unwrap();
        assert_eq!(msg.key.as_deref(), Some("BTC-PERPETUAL"));
        assert_eq!(msg.header(headers::MODEL), Some("ticker"));
        assert_eq!(msg.header(headers::SCHEMA_VERSION), Some("2"));
        assert_eq!(msg.header(headers::PROCESSING_TIMESTAMP), Some("1000.05"));

        let (id, datum) = codec::unframe(&msg.payload).unwrap();
        let latest = registry
            .latest("cryptics.thalex.ticker.avro-value")
            .await
            .unwrap();
        assert_eq!(id, latest.id);
        assert_eq!(latest.version, 2);

        let current = Ticker::schemas().current();
        let decoded: Ticker = codec::decode(datum, current, current).unwrap();
        assert_eq!(decoded.processing_timestamp, Some(1000.05));
        assert_eq!(decoded.mark_timestamp, 1000.0);
    }

    #[tokio::test]
    async fn test_schema_registered_once() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(InMemorySchemaRegistry::new(CompatibilityLevel::Full));
        let producer: Producer<Ticker> =
            Producer::new(context(transport, registry.clone(), binding()));

        let first = producer.register_schema().await.unwrap();
        producer.produce("ETH-PERPETUAL", ticker("ETH-PERPETUAL")).await.unwrap();
        producer.produce("ETH-PERPETUAL", ticker("ETH-PERPETUAL")).await.unwrap();

        let latest = registry
            .latest("cryptics.thalex.ticker.avro-value")
            .await
            .unwrap();
        assert_eq!(latest.id, first);
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn test_invalid_instance_is_dead_lettered() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(InMemorySchemaRegistry::default());
        let producer: Producer<Ticker> =
            Producer::new(context(transport.clone(), registry, binding()));
        let mut main = transport.subscribe(TOPIC).await.unwrap();
        let mut dlq = transport
            .subscribe("cryptics.thalex.ticker.avro.dlq")
            .await
            .unwrap();

        // mark_price missing
        let value = json!({ "instrument_name": "BTC-PERPETUAL", "mark_timestamp": 1000.0 });
        let err = producer
            .produce_json("BTC-PERPETUAL", value)
            .await
            .unwrap_err();
        assert!(err.is_serialization());

        assert!(next(&mut main).await.is_none());
        let dead = next(&mut dlq).await.unwrap();
        let record: JsonValue = serde_json::from_slice(&dead.payload).unwrap();
        assert_eq!(record["model"], "ticker");
        assert_eq!(record["key"], "BTC-PERPETUAL");
        assert_eq!(record["payload"]["mark_timestamp"], 1000.0);
        assert!(record["error"].as_str().unwrap().contains("mark_price"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_retried_until_accepted() {
        let transport = Arc::new(FlakyTransport::new(2));
        let registry = Arc::new(InMemorySchemaRegistry::default());
        let producer: Producer<Ticker> =
            Producer::new(context(transport.clone(), registry, binding()));
        let mut sub = transport.subscribe(TOPIC).await.unwrap();

        producer
            .produce("BTC-PERPETUAL", ticker("BTC-PERPETUAL"))
            .await
            .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(next(&mut sub).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_error_after_exhaustion() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let registry = Arc::new(InMemorySchemaRegistry::default());
        let producer: Producer<Ticker> =
            Producer::new(context(transport.clone(), registry, binding()));

        let err = producer
            .produce("BTC-PERPETUAL", ticker("BTC-PERPETUAL"))
            .await
            .unwrap_err();

        match err {
            ProducerError::Publish { topic, attempts, .. } => {
                assert_eq!(topic, TOPIC);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected publish error, got {other}"),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_same_key_keeps_publish_order() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(InMemorySchemaRegistry::default());
        let topic = "cryptics.thalex.ack.avro";
        let producer: Producer<Ack> = Producer::new(context(
            transport.clone(),
            registry,
            TopicBinding::new("ack", topic, "ack_data"),
        ));
        let mut sub = transport.subscribe(topic).await.unwrap();

        let base = Ack::generate(&mut rand::rng());
        for step in 0..5 {
            let mut ack = base.clone();
            ack.order_id = "order-1".to_string();
            ack.filled_amount = step as f64;
            producer.produce("order-1", ack).await.unwrap();
        }

        let current = Ack::schemas().current();
        for step in 0..5 {
            let msg = next(&mut sub).await.unwrap();
            let (_, datum) = codec::unframe(&msg.payload).unwrap();
            let ack: Ack = codec::decode(datum, current, current).unwrap();
            assert_eq!(ack.filled_amount, step as f64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_synthetic_until_shutdown() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(InMemorySchemaRegistry::default());
        let producer: Arc<Producer<Ticker>> =
            Arc::new(Producer::new(context(transport, registry, binding())));
        let (tx, rx) = watch::channel(false);

        let task = {
            let producer = producer.clone();
            tokio::spawn(async move {
                producer
                    .run_synthetic(Duration::from_millis(100), rx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(true).unwrap();
        let produced = task.await.unwrap();
        assert!(produced >= 3, "produced {}", produced);
    }
}
