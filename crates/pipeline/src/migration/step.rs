use cryptics_schema::{FieldSpec, FieldType};

use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Double,
    BigInt,
    Boolean,
    /// Store-assigned surrogate key
    BigSerial,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Double => "DOUBLE PRECISION",
            Self::BigInt => "BIGINT",
            Self::Boolean => "BOOLEAN",
            Self::BigSerial => "BIGSERIAL",
        }
    }
}

impl From<FieldType> for ColumnType {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String | FieldType::Enum => Self::Text,
            FieldType::Double => Self::Double,
            FieldType::Long => Self::BigInt,
            FieldType::Boolean => Self::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    pub fn nullable(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn render(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.column_type.sql())
        } else {
            format!("{} {} NOT NULL", self.name, self.column_type.sql())
        }
    }
}

impl From<&FieldSpec> for Column {
    fn from(field: &FieldSpec) -> Self {
        Self {
            name: field.name.clone(),
            column_type: field.field_type.into(),
            nullable: field.nullable,
        }
    }
}

/// One schema change. Every variant renders to SQL that is a no-op when
/// the change is already present, so a migration can be re-run after a
/// crash between its statements and its ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    CreateTable {
        table: String,
        columns: Vec<Column>,
        primary_key: Vec<String>,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
    },
    /// Trigger deriving the latency columns on insert and update
    LatencyTrigger {
        table: String,
        source_column: String,
    },
    /// Trigger upserting `orders` and appending `order_status` for every
    /// acknowledgement, inside the acknowledgement's own transaction
    OrderCascade {
        ack_table: String,
    },
    /// Raw SQL, only constructible through `Step::sql`
    Sql(String),
}

impl Step {
    /// Raw SQL step. Rejected unless every DDL statement in it is guarded.
    pub fn sql(text: impl Into<String>) -> Result<Self, MigrationError> {
        let text = text.into();
        ensure_rerunnable(&text)?;
        Ok(Self::Sql(text))
    }

    pub fn render(&self) -> String {
        match self {
            Self::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                let mut lines: Vec<String> = columns.iter().map(Column::render).collect();
                if !primary_key.is_empty() {
                    lines.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
                }
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
                    table,
                    lines.join(",\n    ")
                )
            }
            Self::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                table,
                column.render()
            ),
            Self::CreateIndex {
                name,
                table,
                columns,
            } => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                name,
                table,
                columns.join(", ")
            ),
            Self::LatencyTrigger {
                table,
                source_column,
            } => super::builtin::latency_trigger_sql(table, source_column),
            Self::OrderCascade { ack_table } => super::builtin::order_cascade_sql(ack_table),
            Self::Sql(text) => text.clone(),
        }
    }
}

/// An ordered, named group of steps applied in one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub sequence: u32,
    pub name: String,
    pub steps: Vec<Step>,
}

impl Migration {
    pub fn new(sequence: u32, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            sequence,
            name: name.into(),
            steps,
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.steps.iter().map(Step::render).collect()
    }
}

/// (keyword, guard that must follow it)
const GUARDED: [(&str, &str); 11] = [
    ("CREATE TABLE ", "IF NOT EXISTS"),
    ("CREATE INDEX ", "IF NOT EXISTS"),
    ("CREATE UNIQUE INDEX ", "IF NOT EXISTS"),
    ("CREATE SCHEMA ", "IF NOT EXISTS"),
    ("CREATE SEQUENCE ", "IF NOT EXISTS"),
    ("ADD COLUMN ", "IF NOT EXISTS"),
    ("DROP TABLE ", "IF EXISTS"),
    ("DROP INDEX ", "IF EXISTS"),
    ("DROP TRIGGER ", "IF EXISTS"),
    ("DROP FUNCTION ", "IF EXISTS"),
    ("DROP COLUMN ", "IF EXISTS"),
];

/// Definitions that must be written as CREATE OR REPLACE
const REPLACEABLE: [&str; 4] = [
    "CREATE FUNCTION ",
    "CREATE TRIGGER ",
    "CREATE VIEW ",
    "CREATE PROCEDURE ",
];

/// Reject SQL whose DDL would fail or duplicate work on a second run
pub fn ensure_rerunnable(sql: &str) -> Result<(), MigrationError> {
    let normalized = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
        + " ";

    for (keyword, guard) in GUARDED {
        for (pos, _) in normalized.match_indices(keyword) {
            if !normalized[pos + keyword.len()..].starts_with(guard) {
                return Err(MigrationError::NotRerunnable(format!(
                    "{} without {}",
                    keyword.trim_end(),
                    guard
                )));
            }
        }
    }
    for keyword in REPLACEABLE {
        if normalized.contains(keyword) {
            return Err(MigrationError::NotRerunnable(format!(
                "{} must be CREATE OR REPLACE",
                keyword.trim_end()
            )));
        }
    }
    Ok(())
}
