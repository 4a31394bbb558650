//! Store seams: the migration ledger and the row sink, with a Postgres
//! implementation and an in-memory one that models just enough of a
//! relational schema to exercise migrations and triggers.

mod memory;
mod postgres;

pub use memory::{FailurePoint, InMemoryStore, TableSchema};
pub use postgres::{create_pool, PostgresStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::error::StoreError;
use crate::migration::Migration;

/// Ledger table of applied migrations
pub const MIGRATIONS_TABLE: &str = "migrations";

/// One applied migration. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub sequence: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Applied migrations in sequence order. Creates the ledger if needed.
    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Execute the migration's statements and insert its record in one
    /// transaction. Nothing is kept on error.
    async fn apply(&self, migration: &Migration) -> Result<(), StoreError>;

    /// Whether the table exists on the store's search path
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait RowSink: Send + Sync {
    /// Write one row. With `upsert_keys` set, a row with the same key
    /// values is replaced instead of duplicated.
    async fn write_row(
        &self,
        table: &str,
        row: Map<String, JsonValue>,
        upsert_keys: &[String],
    ) -> Result<(), StoreError>;
}

/// Accept only plain lowercase SQL identifiers
pub fn check_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63;
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
