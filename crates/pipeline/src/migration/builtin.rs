//! Built-in migrations for the model tables, latency columns and triggers,
//! and the order-state cascade fed by acknowledgements.

use cryptics_metadata::PipelineConfig;
use serde_json::{Map, Value as JsonValue};

use super::step::{Column, ColumnType, Migration, Step};
use crate::error::MigrationError;
use crate::latency::{LATENCY_COLUMNS, PROCESSING_TIMESTAMP, STORE_ARRIVAL_TIME};
use crate::registry::ModelKind;
use crate::store::check_identifier;

pub const ORDERS_TABLE: &str = "orders";
pub const ORDER_STATUS_TABLE: &str = "order_status";

/// Surrogate key column of append-only tables
pub const ID_COLUMN: &str = "id";

/// Acknowledgement fields copied into `orders`
const ORDER_FIELDS: [&str; 11] = [
    "order_id",
    "instrument_name",
    "direction",
    "order_type",
    "time_in_force",
    "price",
    "amount",
    "filled_amount",
    "remaining_amount",
    "status",
    "create_time",
];

/// `orders` columns refreshed by a later acknowledgement of the same order
pub const ORDER_UPDATE_FIELDS: [&str; 4] = [
    "filled_amount",
    "remaining_amount",
    "status",
    UPDATED_AT,
];

/// Acknowledgement fields appended to `order_status`
const STATUS_FIELDS: [&str; 6] = [
    "order_id",
    "status",
    "filled_amount",
    "remaining_amount",
    "change_reason",
    "delete_reason",
];

const UPDATED_AT: &str = "updated_at";
const EVENT_TIME: &str = "event_time";
const RECORDED_AT: &str = "recorded_at";

/// Table of every built-in model under the config's bindings, enabled or not
pub fn model_tables(config: &PipelineConfig) -> Vec<(ModelKind, String)> {
    ModelKind::ALL
        .iter()
        .map(|kind| (*kind, config.binding(kind.key()).table))
        .collect()
}

/// Table of every built-in model under the default `<model>_data` names
pub fn default_model_tables() -> Vec<(ModelKind, String)> {
    ModelKind::ALL
        .iter()
        .map(|kind| (*kind, format!("{}_data", kind.key())))
        .collect()
}

/// The built-in migration chain. `tables` must name one table for every
/// built-in model: a recorded migration has to mean the same thing no
/// matter which models a later run enables.
pub fn builtin_migrations(
    tables: &[(ModelKind, String)],
) -> Result<Vec<Migration>, MigrationError> {
    for kind in ModelKind::ALL {
        if tables.iter().filter(|(k, _)| *k == kind).count() != 1 {
            return Err(MigrationError::ModelTable(kind.key().to_string()));
        }
    }
    for (_, table) in tables {
        check_identifier(table)?;
    }

    let mut create = Vec::new();
    let mut evolve = Vec::new();
    let mut triggers = Vec::new();
    for (kind, table) in tables {
        let first = first_version(*kind);
        let mut columns = vec![Column::required(ID_COLUMN, ColumnType::BigSerial)];
        columns.extend(first.fields().iter().map(Column::from));
        create.push(Step::CreateTable {
            table: table.clone(),
            columns,
            primary_key: kind.primary_keys().iter().map(|k| k.to_string()).collect(),
        });

        // Fields added by later schema versions are nullable by construction
        for field in kind.schemas().current().fields() {
            if !first.has_field(&field.name) {
                evolve.push(Step::AddColumn {
                    table: table.clone(),
                    column: Column::from(&field),
                });
            }
        }
        for column in LATENCY_COLUMNS {
            evolve.push(Step::AddColumn {
                table: table.clone(),
                column: Column::nullable(column, ColumnType::Double),
            });
        }
        let source = kind.source_time_field();
        evolve.push(Step::CreateIndex {
            name: format!("{}_{}_idx", table, source),
            table: table.clone(),
            columns: vec![source.to_string()],
        });

        triggers.push(Step::LatencyTrigger {
            table: table.clone(),
            source_column: source.to_string(),
        });
    }

    let mut cascade = vec![
        Step::CreateTable {
            table: ORDERS_TABLE.to_string(),
            columns: orders_columns(),
            primary_key: vec!["order_id".to_string()],
        },
        Step::CreateTable {
            table: ORDER_STATUS_TABLE.to_string(),
            columns: order_status_columns(),
            primary_key: vec![ID_COLUMN.to_string()],
        },
        Step::CreateIndex {
            name: format!("{}_order_id_idx", ORDER_STATUS_TABLE),
            table: ORDER_STATUS_TABLE.to_string(),
            columns: vec!["order_id".to_string()],
        },
    ];
    if let Some((_, ack_table)) = tables.iter().find(|(kind, _)| *kind == ModelKind::Ack) {
        cascade.push(Step::OrderCascade {
            ack_table: ack_table.clone(),
        });
    }

    Ok(vec![
        Migration::new(1, "create_model_tables", create),
        Migration::new(2, "add_latency_columns", evolve),
        Migration::new(3, "install_latency_triggers", triggers),
        Migration::new(4, "order_state_cascade", cascade),
    ])
}

fn first_version(kind: ModelKind) -> &'static cryptics_schema::ModelSchema {
    // A schema set always holds at least version 1
    &kind.schemas().all()[0]
}

fn ack_columns(names: &[&str]) -> Vec<Column> {
    let fields = first_version(ModelKind::Ack).fields();
    names
        .iter()
        .filter_map(|name| fields.iter().find(|f| f.name == *name))
        .map(Column::from)
        .collect()
}

fn orders_columns() -> Vec<Column> {
    let mut columns = ack_columns(&ORDER_FIELDS);
    columns.push(Column::nullable(UPDATED_AT, ColumnType::Double));
    columns
}

fn order_status_columns() -> Vec<Column> {
    let mut columns = vec![Column::required(ID_COLUMN, ColumnType::BigSerial)];
    columns.extend(ack_columns(&STATUS_FIELDS));
    columns.push(Column::required(EVENT_TIME, ColumnType::Double));
    columns.push(Column::nullable(RECORDED_AT, ColumnType::Double));
    columns
}

/// Rows the cascade writes for one stored acknowledgement:
/// (`orders` upsert, `order_status` insert)
pub fn cascade_rows(ack: &Map<String, JsonValue>) -> (Map<String, JsonValue>, Map<String, JsonValue>) {
    let copy = |fields: &[&str]| -> Map<String, JsonValue> {
        fields
            .iter()
            .map(|f| (f.to_string(), ack.get(*f).cloned().unwrap_or(JsonValue::Null)))
            .collect()
    };
    let arrival = ack.get(STORE_ARRIVAL_TIME).cloned().unwrap_or(JsonValue::Null);

    let mut order = copy(&ORDER_FIELDS);
    order.insert(UPDATED_AT.to_string(), arrival.clone());

    let mut status = copy(&STATUS_FIELDS);
    status.insert(
        EVENT_TIME.to_string(),
        ack.get("create_time").cloned().unwrap_or(JsonValue::Null),
    );
    status.insert(RECORDED_AT.to_string(), arrival);
    (order, status)
}

pub(crate) fn latency_trigger_sql(table: &str, source_column: &str) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {table}_latency() RETURNS trigger AS $$
BEGIN
    NEW.{arrival} := COALESCE(NEW.{arrival}, EXTRACT(EPOCH FROM clock_timestamp()));
    NEW.source_to_pipeline_ms := ROUND(((NEW.{processing} - NEW.{source}) * 1000)::numeric, 3);
    NEW.pipeline_to_store_ms := ROUND(((NEW.{arrival} - NEW.{processing}) * 1000)::numeric, 3);
    NEW.total_ms := ROUND(((NEW.{arrival} - NEW.{source}) * 1000)::numeric, 3);
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
CREATE OR REPLACE TRIGGER {table}_latency BEFORE INSERT OR UPDATE ON {table}
    FOR EACH ROW EXECUTE FUNCTION {table}_latency()"#,
        table = table,
        source = source_column,
        arrival = STORE_ARRIVAL_TIME,
        processing = PROCESSING_TIMESTAMP,
    )
}

pub(crate) fn order_cascade_sql(ack_table: &str) -> String {
    let new_values = |fields: &[&str]| {
        fields
            .iter()
            .map(|f| format!("NEW.{}", f))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let updates = ORDER_UPDATE_FIELDS
        .iter()
        .map(|f| format!("{f} = EXCLUDED.{f}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"CREATE OR REPLACE FUNCTION {ack}_order_cascade() RETURNS trigger AS $$
BEGIN
    INSERT INTO {orders} ({order_columns}, {updated_at})
    VALUES ({order_values}, NEW.{arrival})
    ON CONFLICT (order_id) DO UPDATE SET {updates};
    INSERT INTO {status} ({status_columns}, {event_time}, {recorded_at})
    VALUES ({status_values}, NEW.create_time, NEW.{arrival});
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
CREATE OR REPLACE TRIGGER {ack}_order_cascade AFTER INSERT ON {ack}
    FOR EACH ROW EXECUTE FUNCTION {ack}_order_cascade()"#,
        ack = ack_table,
        orders = ORDERS_TABLE,
        status = ORDER_STATUS_TABLE,
        order_columns = ORDER_FIELDS.join(", "),
        order_values = new_values(&ORDER_FIELDS),
        status_columns = STATUS_FIELDS.join(", "),
        status_values = new_values(&STATUS_FIELDS),
        updated_at = UPDATED_AT,
        event_time = EVENT_TIME,
        recorded_at = RECORDED_AT,
        arrival = STORE_ARRIVAL_TIME,
        updates = updates,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::step::ensure_rerunnable;
    use serde_json::json;

    fn tables() -> Vec<(ModelKind, String)> {
        default_model_tables()
    }

    fn create_step<'a>(migration: &'a Migration, table: &str) -> &'a Step {
        migration
            .steps
            .iter()
            .find(|s| matches!(s, Step::CreateTable { table: t, .. } if t == table))
            .unwrap()
    }

    #[test]
    fn test_chain_is_gap_free() {
        let migrations = builtin_migrations(&tables()).unwrap();
        let sequences: Vec<u32> = migrations.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(migrations[0].name, "create_model_tables");
    }

    #[test]
    fn test_model_tables_follow_first_version() {
        let migrations = builtin_migrations(&tables()).unwrap();
        match create_step(&migrations[0], "ticker_data") {
            Step::CreateTable {
                columns,
                primary_key,
                ..
            } => {
                assert_eq!(columns[0], Column::required("id", ColumnType::BigSerial));
                assert!(columns.iter().any(|c| c.name == "mark_timestamp" && !c.nullable));
                assert!(!columns.iter().any(|c| c.name == "processing_timestamp"));
                assert_eq!(primary_key, &vec!["id".to_string()]);
            }
            other => panic!("unexpected step {:?}", other),
        }
        match create_step(&migrations[0], "order_data") {
            Step::CreateTable { primary_key, .. } => {
                assert_eq!(primary_key, &vec!["order_id".to_string(), "create_time".to_string()]);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_latency_columns_added() {
        let migrations = builtin_migrations(&tables()).unwrap();
        let added: Vec<&str> = migrations[1]
            .steps
            .iter()
            .filter_map(|s| match s {
                Step::AddColumn { table, column } if table == "ack_data" => {
                    Some(column.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            added,
            vec![
                "processing_timestamp",
                "store_arrival_time",
                "source_to_pipeline_ms",
                "pipeline_to_store_ms",
                "total_ms"
            ]
        );
        assert!(migrations[1].steps.contains(&Step::CreateIndex {
            name: "index_data_timestamp_idx".to_string(),
            table: "index_data".to_string(),
            columns: vec!["timestamp".to_string()],
        }));
    }

    #[test]
    fn test_all_statements_rerunnable() {
        for migration in builtin_migrations(&tables()).unwrap() {
            for statement in migration.statements() {
                ensure_rerunnable(&statement).unwrap();
            }
        }
    }

    #[test]
    fn test_trigger_sql_uses_source_column() {
        let sql = latency_trigger_sql("trade_data", "time");
        assert!(sql.contains("NEW.processing_timestamp - NEW.time"));
        assert!(sql.contains("BEFORE INSERT OR UPDATE ON trade_data"));
        for column in LATENCY_COLUMNS {
            assert!(sql.contains(&format!("NEW.{}", column)));
        }
    }

    #[test]
    fn test_cascade_sql_targets_ack_table() {
        let sql = order_cascade_sql("ack_data");
        assert!(sql.contains("AFTER INSERT ON ack_data"));
        assert!(sql.contains("ON CONFLICT (order_id) DO UPDATE SET filled_amount = EXCLUDED.filled_amount"));
        assert!(sql.contains("INSERT INTO order_status"));
    }

    #[test]
    fn test_invalid_table_rejected() {
        let mut tables = tables();
        tables[0].1 = "ticker-data".to_string();
        let err = builtin_migrations(&tables).unwrap_err();
        assert!(matches!(err, MigrationError::Store(_)));
    }

    #[test]
    fn test_chain_requires_every_model() {
        let err = builtin_migrations(&[(ModelKind::Ticker, "ticker_data".to_string())]).unwrap_err();
        assert!(matches!(err, MigrationError::ModelTable(ref model) if model == "ack"));

        let mut doubled = tables();
        doubled.push((ModelKind::Trade, "trade_copy".to_string()));
        assert!(matches!(
            builtin_migrations(&doubled),
            Err(MigrationError::ModelTable(ref model)) if model == "trade"
        ));
    }

    #[test]
    fn test_chain_ignores_enabled_models() {
        let yaml = |models: &str| -> PipelineConfig {
            serde_yaml::from_str(&format!(
                r#"
name: migrations-test
namespace: cryptics.thalex
models: [{}]
bindings:
  index:
    table: price_index_data
transport:
  type: memory
schema_registry:
  type: memory
connect:
  type: local
store:
  type: memory
"#,
                models
            ))
            .unwrap()
        };
        let narrow = builtin_migrations(&model_tables(&yaml("ticker"))).unwrap();
        let wide = builtin_migrations(&model_tables(&yaml("ticker, trade, ack"))).unwrap();
        assert_eq!(narrow, wide);
        assert!(narrow[0]
            .steps
            .iter()
            .any(|s| matches!(s, Step::CreateTable { table, .. } if table == "price_index_data")));
        assert!(narrow[3]
            .steps
            .contains(&Step::OrderCascade { ack_table: "ack_data".to_string() }));
    }

    #[test]
    fn test_cascade_rows() {
        let ack = json!({
            "order_id": "o-1",
            "instrument_name": "BTC-PERPETUAL",
            "status": "filled",
            "filled_amount": 1.0,
            "remaining_amount": 0.0,
            "change_reason": "fill",
            "delete_reason": null,
            "create_time": 1000.0,
            "store_arrival_time": 1000.08
        });
        let (order, status) = cascade_rows(ack.as_object().unwrap());
        assert_eq!(order["order_id"], "o-1");
        assert_eq!(order["updated_at"], 1000.08);
        assert_eq!(order["price"], JsonValue::Null);
        assert_eq!(status["event_time"], 1000.0);
        assert_eq!(status["recorded_at"], 1000.08);
        assert_eq!(status.len(), STATUS_FIELDS.len() + 2);
    }
}
