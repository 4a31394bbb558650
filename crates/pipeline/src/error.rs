use cryptics_middleware::{FactoryError, TransportError};
use cryptics_schema::{SchemaError, SchemaRegistryError};
use thiserror::Error;

use crate::connector::{ConnectorState, TransitionError};

/// A model key with no registered producer/connector pair
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown model: {0}")]
pub struct UnknownModelError(pub String);

#[derive(Error, Debug)]
pub enum ProducerError {
    /// The instance does not satisfy the model's current schema.
    /// The message is dropped (and dead-lettered); the producer keeps going.
    #[error(transparent)]
    Serialization(#[from] SchemaError),

    #[error("publish to {topic} failed after {attempts} attempts: {source}")]
    Publish {
        topic: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("schema registration failed: {0}")]
    Registry(#[from] SchemaRegistryError),
}

impl ProducerError {
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("connector {name} submission failed: {reason}")]
    Submission { name: String, reason: String },

    #[error("connector {name} not ready after {waited_ms}ms (state: {state})")]
    Timeout {
        name: String,
        waited_ms: u64,
        state: ConnectorState,
    },

    #[error("connector {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("connector not found: {0}")]
    NotFound(String),

    #[error("connect worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connect worker returned {status}: {body}")]
    Response { status: u16, body: String },

    #[error("invalid connector config: {0}")]
    Config(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column} in {table}")]
    UnknownColumn { table: String, column: String },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("migration {sequence} ({name}) cannot run before migration {missing}")]
    OutOfOrder {
        sequence: u32,
        name: String,
        missing: u32,
    },

    #[error("migration {sequence} ({name}) failed: {source}")]
    Failed {
        sequence: u32,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("migration sequence must be gap-free: expected {expected}, found {found}")]
    Sequence { expected: u32, found: u32 },

    #[error("statement is not safe to re-run: {0}")]
    NotRerunnable(String),

    #[error("built-in migrations need exactly one table for model {0}")]
    ModelTable(String),

    #[error("migration ledger unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Why the local sink worker skipped a record
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("writer schema lookup failed: {0}")]
    Registry(#[from] SchemaRegistryError),
    #[error("writer schema {id} does not parse: {reason}")]
    WriterSchema { id: u32, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Startup and orchestration failures
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    UnknownModel(#[from] UnknownModelError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Transport(#[from] FactoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("health server error: {0}")]
    Server(#[from] std::io::Error),
}
