use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use serde_json::{Map, Value as JsonValue};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use super::{check_identifier, MigrationRecord, MigrationStore, RowSink, MIGRATIONS_TABLE};
use crate::error::StoreError;
use crate::migration::Migration;

/// Create a connection pool from a database URL
pub fn create_pool(database_url: &str) -> Result<Pool, StoreError> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| StoreError::Pool(format!("invalid database URL: {}", e)))?;

    let mut cfg = Config::new();
    if let Some(host) = pg_config.get_hosts().first() {
        match host {
            tokio_postgres::config::Host::Tcp(h) => cfg.host = Some(h.clone()),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(p) => {
                cfg.host = Some(p.to_string_lossy().to_string())
            }
        }
    }
    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }
    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }
    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }
    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| StoreError::Pool(format!("failed to create pool: {}", e)))
}

fn create_ledger_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            sequence INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        MIGRATIONS_TABLE
    )
}

/// Build `INSERT ... SELECT ... FROM json_populate_record(...)` for the
/// given columns. Postgres does the JSON to column type conversion.
fn insert_sql(table: &str, columns: &[&str], upsert_keys: &[String]) -> String {
    let list = columns.join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({list}) SELECT {list} FROM json_populate_record(NULL::{table}, $1::json)",
    );
    if !upsert_keys.is_empty() {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !upsert_keys.iter().any(|k| k == *c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        sql.push_str(&format!(" ON CONFLICT ({})", upsert_keys.join(", ")));
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
        }
    }
    sql
}

/// Migration ledger and row sink backed by Postgres
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(create_pool(database_url)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("failed to get connection: {}", e)))
    }
}

fn db_error(context: &str, e: tokio_postgres::Error) -> StoreError {
    StoreError::Database(format!("{}: {}", context, e))
}

#[async_trait]
impl MigrationStore for PostgresStore {
    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(&create_ledger_sql())
            .await
            .map_err(|e| db_error("failed to create migration ledger", e))?;

        let rows = client
            .query(
                &format!(
                    "SELECT sequence, name, applied_at FROM {} ORDER BY sequence",
                    MIGRATIONS_TABLE
                ),
                &[],
            )
            .await
            .map_err(|e| db_error("failed to read migration ledger", e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let sequence: i32 = row.get(0);
                let applied_at: DateTime<Utc> = row.get(2);
                MigrationRecord {
                    sequence: sequence as u32,
                    name: row.get(1),
                    applied_at,
                }
            })
            .collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&table])
            .await
            .map_err(|e| db_error("failed to look up table", e))?;
        Ok(row.get(0))
    }

    async fn apply(&self, migration: &Migration) -> Result<(), StoreError> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| db_error("failed to begin transaction", e))?;

        for statement in migration.statements() {
            debug!(sequence = migration.sequence, statement = %statement, "executing");
            tx.batch_execute(&statement)
                .await
                .map_err(|e| db_error("statement failed", e))?;
        }
        tx.execute(
            &format!(
                "INSERT INTO {} (sequence, name) VALUES ($1, $2)",
                MIGRATIONS_TABLE
            ),
            &[&(migration.sequence as i32), &migration.name],
        )
        .await
        .map_err(|e| db_error("failed to record migration", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit migration", e))?;
        info!(sequence = migration.sequence, name = %migration.name, "migration committed");
        Ok(())
    }
}

#[async_trait]
impl RowSink for PostgresStore {
    async fn write_row(
        &self,
        table: &str,
        row: Map<String, JsonValue>,
        upsert_keys: &[String],
    ) -> Result<(), StoreError> {
        check_identifier(table)?;
        let mut columns = Vec::with_capacity(row.len());
        for name in row.keys() {
            columns.push(check_identifier(name)?);
        }
        for key in upsert_keys {
            check_identifier(key)?;
        }
        let sql = insert_sql(table, &columns, upsert_keys);

        let client = self.client().await?;
        let param = JsonValue::Object(row);
        client
            .execute(&sql, &[&param])
            .await
            .map_err(|e| db_error(&format!("insert into {} failed", table), e))?;
        Ok(())
    }
}
