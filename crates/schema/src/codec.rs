//! Avro binary encoding of models plus Confluent wire framing:
//! one magic byte (0), a 4-byte big-endian schema id, then the Avro datum.

use apache_avro::types::Value;
use apache_avro::{from_avro_datum, from_value, to_avro_datum, to_value};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::SchemaError;
use crate::model::{Model, ModelSchema};

const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;

/// Encode a record against one version of its schema
pub fn encode<M: Model>(record: &M, schema: &ModelSchema) -> Result<Vec<u8>, SchemaError> {
    let fail = |reason: String| SchemaError::Serialization {
        model: schema.model().to_string(),
        version: schema.version(),
        reason,
    };

    let value = to_value(record).map_err(|e| fail(e.to_string()))?;
    let resolved = value
        .resolve(schema.schema())
        .map_err(|e| fail(e.to_string()))?;
    to_avro_datum(schema.schema(), resolved).map_err(|e| fail(e.to_string()))
}

/// Decode a datum written with `writer`, projected onto `reader`
pub fn decode<M: Model>(
    datum: &[u8],
    writer: &ModelSchema,
    reader: &ModelSchema,
) -> Result<M, SchemaError> {
    let value = decode_value(datum, writer, reader)?;
    from_value::<M>(&value).map_err(|e| SchemaError::Deserialization {
        model: M::NAME.to_string(),
        reason: e.to_string(),
    })
}

/// Decode to a generic Avro value
pub fn decode_value(
    datum: &[u8],
    writer: &ModelSchema,
    reader: &ModelSchema,
) -> Result<Value, SchemaError> {
    let mut input = datum;
    from_avro_datum(writer.schema(), &mut input, Some(reader.schema())).map_err(|e| {
        SchemaError::Deserialization {
            model: reader.model().to_string(),
            reason: e.to_string(),
        }
    })
}

/// Prefix a datum with the wire header
pub fn frame(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + datum.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(datum);
    out
}

/// Split a framed payload into (schema id, datum)
pub fn unframe(payload: &[u8]) -> Result<(u32, &[u8]), SchemaError> {
    if payload.len() < HEADER_LEN {
        return Err(SchemaError::Framing(format!(
            "payload of {} bytes is shorter than the header",
            payload.len()
        )));
    }
    if payload[0] != MAGIC_BYTE {
        return Err(SchemaError::Framing(format!(
            "bad magic byte {:#04x}",
            payload[0]
        )));
    }
    let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((id, &payload[HEADER_LEN..]))
}

/// Flatten a decoded record into a JSON object keyed by field name.
/// Unions collapse to their branch value and enums to their symbol.
pub fn record_to_json(value: &Value) -> Result<Map<String, JsonValue>, SchemaError> {
    match value {
        Value::Record(fields) => Ok(fields
            .iter()
            .map(|(name, v)| (name.clone(), avro_to_json(v)))
            .collect()),
        other => Err(SchemaError::Deserialization {
            model: "record".to_string(),
            reason: format!("expected a record, got {:?}", other),
        }),
    }
}

fn avro_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Long(l) => JsonValue::from(*l),
        Value::Float(f) => Number::from_f64(f64::from(*f))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Double(d) => Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::String(s) | Value::Enum(_, s) => JsonValue::String(s.clone()),
        Value::Union(_, inner) => avro_to_json(inner),
        Value::Array(items) => JsonValue::Array(items.iter().map(avro_to_json).collect()),
        Value::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect(),
        ),
        Value::Record(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), avro_to_json(v)))
                .collect(),
        ),
        other => JsonValue::String(format!("{:?}", other)),
    }
}
