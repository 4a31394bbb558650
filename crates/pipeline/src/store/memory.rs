use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cryptics_middleware::{Clock, SystemClock};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::debug;

use super::{check_identifier, MigrationRecord, MigrationStore, RowSink};
use crate::error::StoreError;
use crate::latency::instrument_row;
use crate::migration::{
    cascade_rows, Column, ColumnType, Migration, Step, ID_COLUMN, ORDERS_TABLE,
    ORDER_STATUS_TABLE, ORDER_UPDATE_FIELDS,
};

type Row = Map<String, JsonValue>;

/// Table definition as the in-memory store tracks it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub indexes: BTreeSet<String>,
    /// Source-time column of the installed latency trigger
    pub latency_source: Option<String>,
    /// Acknowledgements written here cascade into the order tables
    pub order_cascade: bool,
}

impl TableSchema {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn is_append_only(&self) -> bool {
        self.primary_key.len() == 1 && self.primary_key[0] == ID_COLUMN
    }
}

/// Where the next migration should break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Step `step` (0-based) of migration `sequence` fails and the
    /// transaction rolls back
    Statement { sequence: u32, step: usize },
    /// The statements of migration `sequence` commit but its record is
    /// never written, as when DDL is not transactional
    RecordInsert { sequence: u32 },
}

/// Schema, rows and ledger entries, for comparing end states
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    tables: BTreeMap<String, TableSchema>,
    rows: BTreeMap<String, Vec<Row>>,
    raw_sql: BTreeSet<String>,
    serials: BTreeMap<String, i64>,
    applied: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Default)]
struct Database {
    tables: BTreeMap<String, TableSchema>,
    rows: BTreeMap<String, Vec<Row>>,
    /// Raw SQL steps are recorded, not executed
    raw_sql: BTreeSet<String>,
    serials: BTreeMap<String, i64>,
}

#[derive(Default)]
struct State {
    db: Database,
    ledger: Vec<MigrationRecord>,
    failure: Option<FailurePoint>,
}

/// Store kept in process memory. Migrations run against a copy of the
/// schema that replaces the original only on commit; inserts emulate the
/// latency trigger and the order cascade.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// `clock` stamps `store_arrival_time`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// Break the next migration that reaches `point`. One-shot.
    pub async fn fail_at(&self, point: FailurePoint) {
        self.state.lock().await.failure = Some(point);
    }

    pub async fn table(&self, name: &str) -> Option<TableSchema> {
        self.state.lock().await.db.tables.get(name).cloned()
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .await
            .db
            .rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn records(&self) -> Vec<MigrationRecord> {
        self.state.lock().await.ledger.clone()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock().await;
        StoreSnapshot {
            tables: state.db.tables.clone(),
            rows: state.db.rows.clone(),
            raw_sql: state.db.raw_sql.clone(),
            serials: state.db.serials.clone(),
            applied: state
                .ledger
                .iter()
                .map(|r| (r.sequence, r.name.clone()))
                .collect(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn unknown_table(table: &str) -> StoreError {
    StoreError::UnknownTable(table.to_string())
}

fn require_columns(schema: &TableSchema, table: &str, columns: &[&str]) -> Result<(), StoreError> {
    match columns.iter().find(|c| !schema.has_column(c)) {
        Some(missing) => Err(StoreError::UnknownColumn {
            table: table.to_string(),
            column: missing.to_string(),
        }),
        None => Ok(()),
    }
}

/// Apply one step the way its rendered SQL would: a no-op when the change
/// is already present
fn apply_step(db: &mut Database, step: &Step) -> Result<(), StoreError> {
    match step {
        Step::CreateTable {
            table,
            columns,
            primary_key,
        } => {
            check_identifier(table)?;
            if !db.tables.contains_key(table) {
                db.tables.insert(
                    table.clone(),
                    TableSchema {
                        columns: columns.clone(),
                        primary_key: primary_key.clone(),
                        ..TableSchema::default()
                    },
                );
                db.rows.insert(table.clone(), Vec::new());
            }
        }
        Step::AddColumn { table, column } => {
            let schema = db.tables.get_mut(table).ok_or_else(|| unknown_table(table))?;
            if !schema.has_column(&column.name) {
                schema.columns.push(column.clone());
                for row in db.rows.entry(table.clone()).or_default() {
                    row.insert(column.name.clone(), JsonValue::Null);
                }
            }
        }
        Step::CreateIndex {
            name,
            table,
            columns,
        } => {
            let schema = db.tables.get_mut(table).ok_or_else(|| unknown_table(table))?;
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            require_columns(schema, table, &columns)?;
            schema.indexes.insert(name.clone());
        }
        Step::LatencyTrigger {
            table,
            source_column,
        } => {
            let schema = db.tables.get_mut(table).ok_or_else(|| unknown_table(table))?;
            require_columns(schema, table, &[source_column.as_str()])?;
            require_columns(schema, table, &crate::latency::LATENCY_COLUMNS)?;
            require_columns(schema, table, &[crate::latency::PROCESSING_TIMESTAMP])?;
            schema.latency_source = Some(source_column.clone());
        }
        Step::OrderCascade { ack_table } => {
            for table in [ORDERS_TABLE, ORDER_STATUS_TABLE] {
                if !db.tables.contains_key(table) {
                    return Err(unknown_table(table));
                }
            }
            let schema = db
                .tables
                .get_mut(ack_table)
                .ok_or_else(|| unknown_table(ack_table))?;
            schema.order_cascade = true;
        }
        Step::Sql(text) => {
            db.raw_sql.insert(text.clone());
        }
    }
    Ok(())
}

/// Shape a row to its table: reject unknown columns, fill the serial key,
/// null the rest, and enforce NOT NULL
fn normalize(
    schema: &TableSchema,
    table: &str,
    row: Row,
    serials: &mut BTreeMap<String, i64>,
) -> Result<Row, StoreError> {
    if let Some(column) = row.keys().find(|name| !schema.has_column(name)) {
        return Err(StoreError::UnknownColumn {
            table: table.to_string(),
            column: column.clone(),
        });
    }

    let mut shaped = Row::new();
    for column in &schema.columns {
        let value = match row.get(&column.name) {
            Some(value) if !value.is_null() => value.clone(),
            _ if column.column_type == ColumnType::BigSerial => {
                let next = serials.entry(table.to_string()).or_insert(0);
                *next += 1;
                JsonValue::from(*next)
            }
            _ => JsonValue::Null,
        };
        if value.is_null() && !column.nullable {
            return Err(StoreError::Database(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                column.name, table
            )));
        }
        shaped.insert(column.name.clone(), value);
    }
    Ok(shaped)
}

fn same_key(a: &Row, b: &Row, keys: &[String]) -> bool {
    keys.iter().all(|k| a.get(k) == b.get(k))
}

/// Write into `rows`. With `keys`, an existing row with the same key values
/// is updated: every column, or only `update_only` when given.
fn upsert(rows: &mut Vec<Row>, row: Row, keys: &[String], update_only: Option<&[&str]>) {
    if !keys.is_empty() {
        if let Some(existing) = rows.iter_mut().find(|r| same_key(r, &row, keys)) {
            match update_only {
                Some(columns) => {
                    for column in columns {
                        if let Some(value) = row.get(*column) {
                            existing.insert(column.to_string(), value.clone());
                        }
                    }
                }
                None => *existing = row,
            }
            return;
        }
    }
    rows.push(row);
}

#[async_trait]
impl MigrationStore for InMemoryStore {
    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        Ok(self.records().await)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.db.tables.contains_key(table))
    }

    async fn apply(&self, migration: &Migration) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut staged = state.db.clone();

        for (index, step) in migration.steps.iter().enumerate() {
            let injected = FailurePoint::Statement {
                sequence: migration.sequence,
                step: index,
            };
            if state.failure == Some(injected) {
                state.failure = None;
                return Err(StoreError::Database(format!(
                    "injected failure at step {} of migration {}",
                    index, migration.sequence
                )));
            }
            apply_step(&mut staged, step)?;
        }

        if state.failure
            == Some(FailurePoint::RecordInsert {
                sequence: migration.sequence,
            })
        {
            state.failure = None;
            state.db = staged;
            return Err(StoreError::Database(
                "connection lost before the migration record was written".to_string(),
            ));
        }
        if state.ledger.iter().any(|r| r.sequence == migration.sequence) {
            return Err(StoreError::Database(format!(
                "duplicate key value violates unique constraint \"migrations_pkey\" ({})",
                migration.sequence
            )));
        }

        state.db = staged;
        state.ledger.push(MigrationRecord {
            sequence: migration.sequence,
            name: migration.name.clone(),
            applied_at: Utc::now(),
        });
        state.ledger.sort_by_key(|r| r.sequence);
        debug!(sequence = migration.sequence, "migration committed");
        Ok(())
    }
}

#[async_trait]
impl RowSink for InMemoryStore {
    async fn write_row(&self, table: &str, row: Row, upsert_keys: &[String]) -> Result<(), StoreError> {
        let arrival = self.clock.now();
        let mut state = self.state.lock().await;
        let db = &mut state.db;

        let schema = db.tables.get(table).cloned().ok_or_else(|| unknown_table(table))?;
        let mut row = normalize(&schema, table, row, &mut db.serials)?;
        if let Some(source) = &schema.latency_source {
            instrument_row(&mut row, source, arrival);
        }
        if upsert_keys.is_empty() && !schema.is_append_only() {
            let rows = db.rows.get(table).map(Vec::as_slice).unwrap_or_default();
            if rows.iter().any(|r| same_key(r, &row, &schema.primary_key)) {
                return Err(StoreError::Database(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    table
                )));
            }
        }

        // Shape every cascaded row before writing any, so the acknowledgement
        // and its order rows land together or not at all
        let cascade = if schema.order_cascade {
            let (order, status) = cascade_rows(&row);
            let orders = db.tables.get(ORDERS_TABLE).cloned().ok_or_else(|| unknown_table(ORDERS_TABLE))?;
            let statuses = db
                .tables
                .get(ORDER_STATUS_TABLE)
                .cloned()
                .ok_or_else(|| unknown_table(ORDER_STATUS_TABLE))?;
            let order = normalize(&orders, ORDERS_TABLE, order, &mut db.serials)?;
            let status = normalize(&statuses, ORDER_STATUS_TABLE, status, &mut db.serials)?;
            Some((orders.primary_key, order, status))
        } else {
            None
        };

        upsert(db.rows.entry(table.to_string()).or_default(), row, upsert_keys, None);
        if let Some((order_key, order, status)) = cascade {
            upsert(
                db.rows.entry(ORDERS_TABLE.to_string()).or_default(),
                order,
                &order_key,
                Some(&ORDER_UPDATE_FIELDS),
            );
            upsert(
                db.rows.entry(ORDER_STATUS_TABLE.to_string()).or_default(),
                status,
                &[],
                None,
            );
        }
        Ok(())
    }
}
