//! cryptics-schema: Versioned Avro models and the schema registry adapter
//!
//! Each model is a Rust record bound to a chain of embedded `.avsc`
//! documents (see `schemas/`). Producers write with the current version;
//! readers may use any version in the chain.

pub mod codec;
pub mod compatibility;
pub mod error;
pub mod model;
pub mod models;
pub mod registry;

pub use compatibility::{CompatibilityChecker, CompatibilityLevel};
pub use error::{SchemaError, SchemaRegistryError};
pub use model::{FieldSpec, FieldType, Model, ModelSchema, SchemaSet};
pub use models::{
    Ack, Direction, MakerTaker, Order, OrderStatus, OrderType, PriceIndex, Ticker, TimeInForce,
    Trade,
};
pub use registry::{
    ConfluentSchemaRegistry, InMemorySchemaRegistry, RegisteredSchema, SchemaRegistry,
};
