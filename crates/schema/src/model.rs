//! Model abstraction: a named record type bound to an ordered chain of
//! Avro schema versions and a test-data generator.

use apache_avro::schema::RecordSchema;
use apache_avro::Schema;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SchemaError;

/// Semantic type of a model field, as a store column needs it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Double,
    Long,
    Boolean,
    /// Avro enum, stored by symbol
    Enum,
}

/// One field of a model schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// One version of a model's schema
#[derive(Debug, Clone)]
pub struct ModelSchema {
    model: &'static str,
    version: u32,
    document: &'static str,
    schema: Schema,
}

impl ModelSchema {
    pub fn parse(
        model: &'static str,
        version: u32,
        document: &'static str,
    ) -> Result<Self, SchemaError> {
        let schema = Schema::parse_str(document)
            .map_err(|e| SchemaError::Parse(format!("{} v{}: {}", model, version, e)))?;
        if !matches!(schema, Schema::Record(_)) {
            return Err(SchemaError::Parse(format!(
                "{} v{}: top-level schema must be a record",
                model, version
            )));
        }
        Ok(Self {
            model,
            version,
            document,
            schema,
        })
    }

    pub fn model(&self) -> &'static str {
        self.model
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Schema document as registered with the schema registry
    pub fn document(&self) -> &'static str {
        self.document
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn record(&self) -> &RecordSchema {
        match &self.schema {
            Schema::Record(record) => record,
            // parse() only admits records
            _ => unreachable!("model schema is always a record"),
        }
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.record().fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.record().fields.iter().any(|f| f.name == name)
    }

    /// Fields in declaration order with their semantic types.
    /// `["null", T]` unions become nullable `T`.
    pub fn fields(&self) -> Vec<FieldSpec> {
        self.record()
            .fields
            .iter()
            .map(|f| {
                let (inner, nullable) = match &f.schema {
                    Schema::Union(union) => (
                        union.variants().iter().find(|v| !matches!(v, Schema::Null)),
                        true,
                    ),
                    other => (Some(other), false),
                };
                FieldSpec {
                    name: f.name.clone(),
                    field_type: inner.map(field_type).unwrap_or(FieldType::String),
                    nullable,
                }
            })
            .collect()
    }

    /// Check that `next` is a legal successor: exactly one version later,
    /// every existing field kept with its type, every new field nullable
    /// with a null default.
    pub fn validate_evolution(&self, next: &ModelSchema) -> Result<(), SchemaError> {
        let fail = |reason: String| SchemaError::Evolution {
            model: next.model.to_string(),
            version: next.version,
            reason,
        };

        if next.model != self.model {
            return Err(fail(format!("model renamed from {}", self.model)));
        }
        if next.version != self.version + 1 {
            return Err(fail(format!("does not follow v{}", self.version)));
        }

        let current = self.record();
        let candidate = next.record();

        for field in &current.fields {
            match candidate.fields.iter().find(|f| f.name == field.name) {
                None => return Err(fail(format!("field '{}' removed", field.name))),
                Some(f) if f.schema != field.schema => {
                    return Err(fail(format!("field '{}' retyped", field.name)))
                }
                Some(_) => {}
            }
        }

        for field in &candidate.fields {
            if current.fields.iter().any(|f| f.name == field.name) {
                continue;
            }
            let nullable = match &field.schema {
                Schema::Union(union) => matches!(union.variants().first(), Some(Schema::Null)),
                _ => false,
            };
            let null_default = matches!(field.default, Some(serde_json::Value::Null));
            if !nullable || !null_default {
                return Err(fail(format!(
                    "added field '{}' must be nullable with default null",
                    field.name
                )));
            }
        }

        Ok(())
    }
}

fn field_type(schema: &Schema) -> FieldType {
    match schema {
        Schema::Double | Schema::Float => FieldType::Double,
        Schema::Int | Schema::Long => FieldType::Long,
        Schema::Boolean => FieldType::Boolean,
        Schema::Enum(_) => FieldType::Enum,
        _ => FieldType::String,
    }
}

/// Every schema version of one model, oldest first
#[derive(Debug, Clone)]
pub struct SchemaSet {
    versions: Vec<ModelSchema>,
}

impl SchemaSet {
    /// Build and validate the chain. Versions must start at 1.
    pub fn new(versions: Vec<ModelSchema>) -> Result<Self, SchemaError> {
        let first = versions
            .first()
            .ok_or_else(|| SchemaError::Parse("model has no schema versions".to_string()))?;
        if first.version != 1 {
            return Err(SchemaError::Evolution {
                model: first.model.to_string(),
                version: first.version,
                reason: "first version must be 1".to_string(),
            });
        }
        for pair in versions.windows(2) {
            pair[0].validate_evolution(&pair[1])?;
        }
        Ok(Self { versions })
    }

    /// Current (highest) version, used for writing
    pub fn current(&self) -> &ModelSchema {
        // new() rejects an empty chain
        &self.versions[self.versions.len() - 1]
    }

    pub fn version(&self, version: u32) -> Result<&ModelSchema, SchemaError> {
        self.versions
            .iter()
            .find(|s| s.version == version)
            .ok_or_else(|| SchemaError::UnknownVersion {
                model: self.current().model.to_string(),
                version,
            })
    }

    pub fn all(&self) -> &[ModelSchema] {
        &self.versions
    }
}

/// A market or order event type that flows through the pipeline
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Unique model key, also used in topic and table names
    const NAME: &'static str;

    fn schemas() -> &'static SchemaSet;

    /// Partition key: the entity this record belongs to
    fn key(&self) -> &str;

    /// Exchange-side event time in epoch seconds
    fn source_event_time(&self) -> Option<f64>;

    fn processing_timestamp(&self) -> Option<f64>;

    fn set_processing_timestamp(&mut self, ts: f64);

    /// Random but plausible instance
    fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self;
}
