//! cryptics-pipeline-lib: Market data pipeline runtime
//!
//! Producers serialize exchange models onto the bus, sink connectors drain
//! them into the store, and the migration engine keeps the store schema in
//! step with the model schemas. Each model is wired in through the
//! component registry.

pub mod backoff;
pub mod connector;
pub mod error;
pub mod latency;
pub mod metrics;
pub mod migration;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod server;
pub mod sink;
pub mod store;

pub use connector::{ConnectControl, ConnectorState, KafkaConnectClient, SinkConnector};
pub use error::{
    ConnectorError, MigrationError, PipelineError, ProducerError, SinkError, StoreError,
    UnknownModelError,
};
pub use latency::LatencyMetrics;
pub use migration::{
    builtin_migrations, default_model_tables, model_tables, Migration, MigrationEngine, Step,
};
pub use pipeline::{Pipeline, PipelineParts, RunningPipeline};
pub use producer::{DynProducer, Producer};
pub use registry::{ComponentRegistry, ModelKind, Registration};
pub use server::{create_router, run_server, PipelineHealth, ServerState};
pub use sink::LocalConnectWorker;
pub use store::{InMemoryStore, MigrationStore, PostgresStore, RowSink};
