//! Local connect worker: runs sink connectors in-process, draining bus
//! topics into the store. Used when no external connect cluster is
//! configured, and in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use apache_avro::{from_avro_datum, Schema};
use async_trait::async_trait;
use cryptics_middleware::{
    headers, Clock, Subscription, Transport, TransportError, TransportMessage,
};
use cryptics_schema::{codec, SchemaError, SchemaRegistry};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::{
    table_of, ConnectControl, ConnectorStatus, TaskStatus, WorkerState, STATE_FAILED,
    STATE_RUNNING,
};
use crate::error::{ConnectorError, SinkError};
use crate::latency::{LatencyMetrics, PROCESSING_TIMESTAMP};
use crate::metrics::SinkMetrics;
use crate::registry::ModelKind;
use crate::store::RowSink;

const WORKER_ID: &str = "local";

/// How long a stopping sink task may take to finish its current write and
/// flush what its subscription already holds
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A stopping sink task treats its subscription as drained once nothing
/// arrives for this long
const FLUSH_IDLE: Duration = Duration::from_millis(20);

struct Deployed {
    config: BTreeMap<String, String>,
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
    failure: Arc<OnceCell<String>>,
}

impl Deployed {
    /// Signal the task, then wait up to `grace` before aborting it
    async fn stop(self, name: &str, grace: Duration) {
        self.stop.send(true).ok();
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => debug!(connector = %name, "sink task stopped"),
            Err(_) => {
                task.abort();
                warn!(connector = %name, grace_ms = grace.as_millis() as u64, "sink task did not stop in time, aborted");
            }
        }
    }

    fn task_state(&self) -> WorkerState {
        let failed = self.task.is_finished();
        WorkerState {
            state: if failed { STATE_FAILED } else { STATE_RUNNING }.to_string(),
            worker_id: Some(WORKER_ID.to_string()),
            trace: if failed {
                Some(
                    self.failure
                        .get()
                        .cloned()
                        .unwrap_or_else(|| "task stopped".to_string()),
                )
            } else {
                None
            },
        }
    }
}

/// In-process stand-in for a connect worker. Each connector gets one task
/// that decodes envelopes with their writer schema and writes rows to the
/// store. Bad records are logged and skipped, like `errors.tolerance=all`.
pub struct LocalConnectWorker {
    transport: Arc<dyn Transport>,
    registry: Arc<dyn SchemaRegistry>,
    store: Arc<dyn RowSink>,
    clock: Arc<dyn Clock>,
    writers: Arc<DashMap<u32, Arc<Schema>>>,
    connectors: Mutex<HashMap<String, Deployed>>,
    shutdown_grace: Duration,
}

impl LocalConnectWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<dyn SchemaRegistry>,
        store: Arc<dyn RowSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            registry,
            store,
            clock,
            writers: Arc::new(DashMap::new()),
            connectors: Mutex::new(HashMap::new()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Subscribe before spawning so nothing published after `put_config`
    /// returns is missed
    async fn deploy(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<Deployed, ConnectorError> {
        let table = table_of(config)?;
        let topic = config
            .get("topics")
            .ok_or_else(|| ConnectorError::Config("topics is required".to_string()))?;
        let upsert_keys: Vec<String> = match config.get("insert.mode").map(String::as_str) {
            Some("upsert") => config
                .get("pk.fields")
                .ok_or_else(|| ConnectorError::Config("upsert requires pk.fields".to_string()))?
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        let subscription = self.transport.subscribe(topic).await.map_err(|e| {
            ConnectorError::Failed {
                name: name.to_string(),
                reason: format!("subscribe to {} failed: {}", topic, e),
            }
        })?;

        let drain = Drain {
            name: name.to_string(),
            table,
            upsert_keys,
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            writers: Arc::clone(&self.writers),
        };
        let failure = Arc::new(OnceCell::new());
        let (stop, stop_rx) = watch::channel(false);
        let task = {
            let failure = Arc::clone(&failure);
            tokio::spawn(async move {
                let name = drain.name.clone();
                if let Err(e) = drain.run(subscription, stop_rx).await {
                    error!(connector = %name, error = %e, "sink task stopped");
                    let _ = failure.set(e.to_string());
                }
            })
        };
        info!(connector = %name, topic = %topic, "sink task started");

        Ok(Deployed {
            config: config.clone(),
            task,
            stop,
            failure,
        })
    }

    /// Stop every sink task. Each finishes the write in progress and
    /// flushes its buffered records; a task still busy after the grace
    /// period is aborted.
    pub async fn shutdown(&self) {
        let deployed: Vec<(String, Deployed)> = self.connectors.lock().await.drain().collect();
        let grace = self.shutdown_grace;
        let stops = deployed
            .into_iter()
            .map(|(name, deployed)| async move { deployed.stop(&name, grace).await });
        futures_util::future::join_all(stops).await;
        info!("local sink tasks stopped");
    }
}

#[async_trait]
impl ConnectControl for LocalConnectWorker {
    async fn put_config(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), ConnectorError> {
        let mut connectors = self.connectors.lock().await;
        let deployed = self.deploy(name, config).await?;
        if let Some(previous) = connectors.insert(name.to_string(), deployed) {
            previous.stop(name, self.shutdown_grace).await;
        }
        Ok(())
    }

    async fn get_config(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ConnectorError> {
        let connectors = self.connectors.lock().await;
        Ok(connectors.get(name).map(|d| {
            let mut config = d.config.clone();
            config.insert("name".to_string(), name.to_string());
            config
        }))
    }

    async fn status(&self, name: &str) -> Result<ConnectorStatus, ConnectorError> {
        let connectors = self.connectors.lock().await;
        let deployed = connectors
            .get(name)
            .ok_or_else(|| ConnectorError::NotFound(name.to_string()))?;
        Ok(ConnectorStatus {
            name: name.to_string(),
            connector: WorkerState {
                state: STATE_RUNNING.to_string(),
                worker_id: Some(WORKER_ID.to_string()),
                trace: None,
            },
            tasks: vec![TaskStatus {
                id: 0,
                status: deployed.task_state(),
            }],
        })
    }

    async fn restart(&self, name: &str) -> Result<(), ConnectorError> {
        let mut connectors = self.connectors.lock().await;
        let config = connectors
            .get(name)
            .map(|d| d.config.clone())
            .ok_or_else(|| ConnectorError::NotFound(name.to_string()))?;
        let deployed = self.deploy(name, &config).await?;
        if let Some(previous) = connectors.insert(name.to_string(), deployed) {
            previous.stop(name, self.shutdown_grace).await;
        }
        info!(connector = %name, "sink task restarted");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ConnectorError> {
        let mut names: Vec<String> = self.connectors.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<(), ConnectorError> {
        let deployed = self
            .connectors
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| ConnectorError::NotFound(name.to_string()))?;
        deployed.stop(name, self.shutdown_grace).await;
        info!(connector = %name, "sink connector deleted");
        Ok(())
    }
}

/// One sink task's view of the world
struct Drain {
    name: String,
    table: String,
    upsert_keys: Vec<String>,
    registry: Arc<dyn SchemaRegistry>,
    store: Arc<dyn RowSink>,
    clock: Arc<dyn Clock>,
    writers: Arc<DashMap<u32, Arc<Schema>>>,
}

impl Drain {
    /// Drain until stopped. Waiting for the next record is the only point
    /// a stop interrupts; a write in progress always completes.
    async fn run(
        self,
        mut subscription: Box<dyn Subscription>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        loop {
            let next = tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
                next = subscription.next() => next,
            };
            self.handle(next).await?;
        }

        let mut flushed = 0u64;
        while let Ok(next) = tokio::time::timeout(FLUSH_IDLE, subscription.next()).await {
            if matches!(next, Err(TransportError::Closed)) {
                break;
            }
            self.handle(next).await?;
            flushed += 1;
        }
        info!(connector = %self.name, flushed, "sink task drained");
        Ok(())
    }

    async fn handle(&self, next: Result<TransportMessage, TransportError>) -> Result<(), TransportError> {
        match next {
            Ok(msg) => {
                let model = msg.header(headers::MODEL).unwrap_or("unknown").to_string();
                let metrics = SinkMetrics::new(model.as_str(), self.table.as_str());
                match self.store_message(&model, &msg).await {
                    Ok(latency) => {
                        metrics.inc_rows();
                        if let Some(latency) = latency {
                            metrics.observe_latency(&latency);
                        }
                    }
                    Err(e) => {
                        metrics.inc_errors();
                        warn!(connector = %self.name, table = %self.table, key = ?msg.key, error = %e, "record skipped");
                    }
                }
                Ok(())
            }
            Err(TransportError::Lagged(skipped)) => {
                SinkMetrics::new("unknown", self.table.as_str()).add_lost(skipped);
                warn!(connector = %self.name, skipped, "sink task lagged, records lost");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn store_message(
        &self,
        model: &str,
        msg: &TransportMessage,
    ) -> Result<Option<LatencyMetrics>, SinkError> {
        let (schema_id, datum) = codec::unframe(&msg.payload)?;
        let writer = self.writer_schema(schema_id).await?;
        let mut input = datum;
        let value = from_avro_datum(&writer, &mut input, None).map_err(|e| {
            SchemaError::Deserialization {
                model: model.to_string(),
                reason: e.to_string(),
            }
        })?;
        let row = codec::record_to_json(&value)?;

        // Observed at hand-off; the stored columns come from the store's clock
        let latency = ModelKind::from_key(model).ok().map(|kind| {
            let get = |row: &Map<String, JsonValue>, name: &str| {
                row.get(name).and_then(JsonValue::as_f64)
            };
            LatencyMetrics::derive(
                get(&row, kind.source_time_field()),
                get(&row, PROCESSING_TIMESTAMP),
                Some(self.clock.now()),
            )
        });

        self.store
            .write_row(&self.table, row, &self.upsert_keys)
            .await?;
        Ok(latency)
    }

    async fn writer_schema(&self, id: u32) -> Result<Arc<Schema>, SinkError> {
        let cached = self.writers.get(&id).map(|s| Arc::clone(s.value()));
        if let Some(schema) = cached {
            return Ok(schema);
        }
        let document = self.registry.get_by_id(id).await?;
        let schema = Schema::parse_str(&document).map_err(|e| SinkError::WriterSchema {
            id,
            reason: e.to_string(),
        })?;
        let schema = Arc::new(schema);
        self.writers.insert(id, Arc::clone(&schema));
        Ok(schema)
    }
}
