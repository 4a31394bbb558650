//! Avro schema compatibility under the reader/writer resolution rules.
//!
//! BACKWARD: a reader on the new schema can read data written with the old one.
//! FORWARD: a reader on the old schema can read data written with the new one.
//! FULL: both.

use apache_avro::Schema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompatibilityLevel {
    None,
    Backward,
    Forward,
    #[default]
    Full,
}

impl CompatibilityLevel {
    pub fn is_backward(self) -> bool {
        matches!(self, Self::Backward | Self::Full)
    }

    pub fn is_forward(self) -> bool {
        matches!(self, Self::Forward | Self::Full)
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Backward => "BACKWARD",
            Self::Forward => "FORWARD",
            Self::Full => "FULL",
        };
        f.write_str(s)
    }
}

impl FromStr for CompatibilityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "BACKWARD" => Ok(Self::Backward),
            "FORWARD" => Ok(Self::Forward),
            "FULL" => Ok(Self::Full),
            other => Err(format!("unknown compatibility level: {}", other)),
        }
    }
}

/// Checks a candidate schema against the latest registered one
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityChecker {
    level: CompatibilityLevel,
}

impl CompatibilityChecker {
    pub fn new(level: CompatibilityLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompatibilityLevel {
        self.level
    }

    /// Returns the reasons `candidate` is incompatible with `existing`.
    /// An empty list means compatible.
    pub fn check(&self, candidate: &Schema, existing: &Schema) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.level.is_backward() {
            if let Err(e) = check_resolution(existing, candidate) {
                reasons.push(format!("backward: {}", e));
            }
        }
        if self.level.is_forward() {
            if let Err(e) = check_resolution(candidate, existing) {
                reasons.push(format!("forward: {}", e));
            }
        }
        reasons
    }
}

/// Can data written with `writer` be read with `reader`?
pub fn check_resolution(writer: &Schema, reader: &Schema) -> Result<(), String> {
    match (writer, reader) {
        (Schema::Null, Schema::Null)
        | (Schema::Boolean, Schema::Boolean)
        | (Schema::String, Schema::String)
        | (Schema::Bytes, Schema::Bytes)
        | (Schema::String, Schema::Bytes)
        | (Schema::Bytes, Schema::String) => Ok(()),

        // int -> long -> float -> double
        (Schema::Int, Schema::Int | Schema::Long | Schema::Float | Schema::Double)
        | (Schema::Long, Schema::Long | Schema::Float | Schema::Double)
        | (Schema::Float, Schema::Float | Schema::Double)
        | (Schema::Double, Schema::Double) => Ok(()),

        (Schema::Array(w), Schema::Array(r)) => check_resolution(&w.items, &r.items),
        (Schema::Map(w), Schema::Map(r)) => check_resolution(&w.types, &r.types),

        (Schema::Enum(w), Schema::Enum(r)) => {
            if r.default.is_some() {
                return Ok(());
            }
            match w.symbols.iter().find(|s| !r.symbols.contains(s)) {
                Some(missing) => Err(format!(
                    "enum {} symbol '{}' unknown to reader",
                    w.name.name, missing
                )),
                None => Ok(()),
            }
        }

        (Schema::Record(w), Schema::Record(r)) => {
            for r_field in &r.fields {
                match w.fields.iter().find(|wf| wf.name == r_field.name) {
                    Some(w_field) => check_resolution(&w_field.schema, &r_field.schema)
                        .map_err(|e| format!("field '{}': {}", r_field.name, e))?,
                    None if r_field.default.is_none() => {
                        return Err(format!(
                            "reader field '{}' missing from writer and has no default",
                            r_field.name
                        ));
                    }
                    None => {}
                }
            }
            Ok(())
        }

        (Schema::Union(w), _) => {
            for variant in w.variants() {
                check_resolution(variant, reader)?;
            }
            Ok(())
        }

        (w, Schema::Union(r)) => {
            if r.variants().iter().any(|rv| check_resolution(w, rv).is_ok()) {
                Ok(())
            } else {
                Err(format!("writer type {:?} matches no reader union branch", w))
            }
        }

        (w, r) => Err(format!("type mismatch: writer={:?}, reader={:?}", w, r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> Schema {
        Schema::parse_str(doc).unwrap()
    }

    const BASE: &str = r#"{"type":"record","name":"T","fields":[
        {"name":"id","type":"string"},
        {"name":"price","type":"double"}]}"#;

    const WITH_OPTIONAL: &str = r#"{"type":"record","name":"T","fields":[
        {"name":"id","type":"string"},
        {"name":"price","type":"double"},
        {"name":"note","type":["null","string"],"default":null}]}"#;

    const WITH_REQUIRED: &str = r#"{"type":"record","name":"T","fields":[
        {"name":"id","type":"string"},
        {"name":"price","type":"double"},
        {"name":"qty","type":"double"}]}"#;

    const WITHOUT_PRICE: &str = r#"{"type":"record","name":"T","fields":[
        {"name":"id","type":"string"}]}"#;

    #[test]
    fn test_level_properties() {
        assert!(CompatibilityLevel::Full.is_backward());
        assert!(CompatibilityLevel::Full.is_forward());
        assert!(!CompatibilityLevel::Backward.is_forward());
        assert!(!CompatibilityLevel::None.is_backward());
        assert_eq!("full".parse::<CompatibilityLevel>().unwrap(), CompatibilityLevel::Full);
        assert_eq!(CompatibilityLevel::Forward.to_string(), "FORWARD");
    }

    #[test]
    fn test_adding_nullable_field_is_fully_compatible() {
        let checker = CompatibilityChecker::new(CompatibilityLevel::Full);
        assert!(checker.check(&parse(WITH_OPTIONAL), &parse(BASE)).is_empty());
    }

    #[test]
    fn test_adding_required_field_breaks_backward() {
        let checker = CompatibilityChecker::new(CompatibilityLevel::Full);
        let reasons = checker.check(&parse(WITH_REQUIRED), &parse(BASE));
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with("backward"));
        assert!(reasons[0].contains("qty"));
    }

    #[test]
    fn test_removing_required_field_breaks_forward() {
        let checker = CompatibilityChecker::new(CompatibilityLevel::Full);
        let reasons = checker.check(&parse(WITHOUT_PRICE), &parse(BASE));
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with("forward"));

        let backward_only = CompatibilityChecker::new(CompatibilityLevel::Backward);
        assert!(backward_only
            .check(&parse(WITHOUT_PRICE), &parse(BASE))
            .is_empty());
    }

    #[test]
    fn test_retyping_field_is_incompatible() {
        let retyped = r#"{"type":"record","name":"T","fields":[
            {"name":"id","type":"string"},
            {"name":"price","type":"string"}]}"#;
        let checker = CompatibilityChecker::new(CompatibilityLevel::Full);
        assert_eq!(checker.check(&parse(retyped), &parse(BASE)).len(), 2);
    }

    #[test]
    fn test_numeric_promotion_is_one_way() {
        assert!(check_resolution(&Schema::Int, &Schema::Long).is_ok());
        assert!(check_resolution(&Schema::Long, &Schema::Double).is_ok());
        assert!(check_resolution(&Schema::Double, &Schema::Long).is_err());
    }

    #[test]
    fn test_enum_symbols() {
        let two = parse(r#"{"type":"enum","name":"S","symbols":["buy","sell"]}"#);
        let one = parse(r#"{"type":"enum","name":"S","symbols":["buy"]}"#);
        assert!(check_resolution(&one, &two).is_ok());
        assert!(check_resolution(&two, &one).is_err());
    }

    #[test]
    fn test_level_none_accepts_anything() {
        let checker = CompatibilityChecker::new(CompatibilityLevel::None);
        assert!(checker.check(&parse(WITHOUT_PRICE), &parse(WITH_REQUIRED)).is_empty());
    }
}
