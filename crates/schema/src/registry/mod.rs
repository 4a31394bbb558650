//! Schema Registry Adapter: resolves subjects and versions to schema
//! documents and guards compatibility between registered versions.

mod http;
mod memory;

pub use http::ConfluentSchemaRegistry;
pub use memory::InMemorySchemaRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SchemaRegistryError;

/// A schema version as stored by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub subject: String,
    pub id: u32,
    pub version: u32,
    #[serde(rename = "schema")]
    pub document: String,
}

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register a document under a subject and return its global id.
    /// Registering an identical document again returns the existing id.
    async fn register(&self, subject: &str, document: &str) -> Result<u32, SchemaRegistryError>;

    async fn get(&self, subject: &str, version: u32)
        -> Result<RegisteredSchema, SchemaRegistryError>;

    /// Schema document for a global id
    async fn get_by_id(&self, id: u32) -> Result<String, SchemaRegistryError>;

    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, SchemaRegistryError>;
}
