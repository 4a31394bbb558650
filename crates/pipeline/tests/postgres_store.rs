//! Migration and trigger tests against a real PostgreSQL (14+).
//!
//! Set DATABASE_URL and run with:
//!   cargo test -p cryptics-pipeline-lib --test postgres_store -- --ignored
//! or start a throwaway container with:
//!   cargo test -p cryptics-pipeline-lib --features testcontainers --test postgres_store

use std::sync::Arc;

use cryptics_pipeline_lib::{
    builtin_migrations, default_model_tables, MigrationEngine, MigrationStore, ModelKind, PostgresStore, RowSink,
};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

fn tables() -> Vec<(ModelKind, String)> {
    default_model_tables()
}

fn row(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().cloned().unwrap()
}

async fn migrate_twice(store: Arc<PostgresStore>) {
    let engine = MigrationEngine::new(store.clone(), builtin_migrations(&tables()).unwrap()).unwrap();
    engine.run().await.unwrap();
    let records = store.applied().await.unwrap();
    assert_eq!(records.len(), 4);
    assert!(store.table_exists("order_data").await.unwrap());
    assert!(store.table_exists("order_status").await.unwrap());
    assert!(!store.table_exists("quote_data").await.unwrap());

    // A second run is a no-op
    assert!(engine.run().await.unwrap().is_empty());
    assert_eq!(store.applied().await.unwrap(), records);
    assert_eq!(engine.pending_migrations().await.unwrap().count(), 0);

    // Every statement is safe to execute again outside the ledger
    for migration in engine.migrations() {
        let client = store.pool().get().await.unwrap();
        for statement in migration.statements() {
            client.batch_execute(&statement).await.unwrap();
        }
    }
}

async fn latency_trigger(store: Arc<PostgresStore>) {
    let index_name = format!("TEST-{}", Uuid::new_v4());
    store
        .write_row(
            "index_data",
            row(json!({
                "index_name": index_name,
                "price": 43000.5,
                "timestamp": 1000.0,
                "processing_timestamp": 1000.05,
                "store_arrival_time": 1000.08
            })),
            &[],
        )
        .await
        .unwrap();

    let client = store.pool().get().await.unwrap();
    let stored = client
        .query_one(
            "SELECT source_to_pipeline_ms, pipeline_to_store_ms, total_ms FROM index_data WHERE index_name = $1",
            &[&index_name],
        )
        .await
        .unwrap();
    let source_to_pipeline: f64 = stored.get(0);
    let pipeline_to_store: f64 = stored.get(1);
    let total: f64 = stored.get(2);
    assert_eq!(source_to_pipeline, 50.0);
    assert_eq!(pipeline_to_store, 30.0);
    assert_eq!(total, 80.0);
}

async fn order_cascade(store: Arc<PostgresStore>) {
    let order_id = format!("test-{}", Uuid::new_v4());
    for (status, filled, reason) in [("open", 0.0, "insert"), ("filled", 1.0, "fill")] {
        store
            .write_row(
                "ack_data",
                row(json!({
                    "order_id": order_id,
                    "instrument_name": "BTC-PERPETUAL",
                    "direction": "buy",
                    "price": 43000.0,
                    "amount": 1.0,
                    "filled_amount": filled,
                    "remaining_amount": 1.0 - filled,
                    "status": status,
                    "order_type": "limit",
                    "time_in_force": "good_till_cancelled",
                    "change_reason": reason,
                    "create_time": 1000.0,
                    "persistent": false,
                    "processing_timestamp": 1000.05
                })),
                &[],
            )
            .await
            .unwrap();
    }

    let client = store.pool().get().await.unwrap();
    let order = client
        .query_one("SELECT status FROM orders WHERE order_id = $1", &[&order_id])
        .await
        .unwrap();
    let status: String = order.get(0);
    assert_eq!(status, "filled");

    let history = client
        .query(
            "SELECT change_reason FROM order_status WHERE order_id = $1 ORDER BY id",
            &[&order_id],
        )
        .await
        .unwrap();
    let reasons: Vec<String> = history.iter().map(|r| r.get(0)).collect();
    assert_eq!(reasons, vec!["insert", "fill"]);
}

async fn upsert_by_natural_key(store: Arc<PostgresStore>) {
    let order_id = format!("test-{}", Uuid::new_v4());
    let keys = vec!["order_id".to_string(), "create_time".to_string()];
    for status in ["open", "filled"] {
        store
            .write_row(
                "order_data",
                row(json!({
                    "order_id": order_id,
                    "instrument_name": "BTC-PERPETUAL",
                    "direction": "buy",
                    "price": 43000.0,
                    "amount": 1.0,
                    "filled_amount": 0.0,
                    "remaining_amount": 1.0,
                    "client_order_id": 7,
                    "status": status,
                    "fills": "[]",
                    "change_reason": "insert",
                    "insert_reason": "client_request",
                    "create_time": 1000.0,
                    "order_type": "limit",
                    "time_in_force": "good_till_cancelled",
                    "persistent": false
                })),
                &keys,
            )
            .await
            .unwrap();
    }

    let client = store.pool().get().await.unwrap();
    let rows = client
        .query("SELECT status FROM order_data WHERE order_id = $1", &[&order_id])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let status: String = rows[0].get(0);
    assert_eq!(status, "filled");
}

async fn run_all(url: &str) {
    let store = Arc::new(PostgresStore::connect(url).unwrap());
    migrate_twice(store.clone()).await;
    latency_trigger(store.clone()).await;
    order_cascade(store.clone()).await;
    upsert_by_natural_key(store).await;
}

#[tokio::test]
#[ignore]
async fn test_against_database_url() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    run_all(&url).await;
}

#[cfg(feature = "testcontainers")]
#[tokio::test]
async fn test_against_container() {
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;

    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    run_all(&url).await;
}
