//! Migration Engine: ordered, exactly-once, re-runnable schema evolution
//! recorded in a ledger table.

mod builtin;
mod engine;
mod step;

pub use builtin::{
    builtin_migrations, cascade_rows, default_model_tables, model_tables, ID_COLUMN, ORDERS_TABLE, ORDER_STATUS_TABLE,
    ORDER_UPDATE_FIELDS,
};
pub use engine::{MigrationEngine, PendingMigrations};
pub use step::{ensure_rerunnable, Column, ColumnType, Migration, Step};
