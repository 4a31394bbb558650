use thiserror::Error;

/// Errors from encoding, decoding and schema bookkeeping
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema parse error: {0}")]
    Parse(String),
    #[error("record does not satisfy schema {model} v{version}: {reason}")]
    Serialization {
        model: String,
        version: u32,
        reason: String,
    },
    #[error("failed to decode {model}: {reason}")]
    Deserialization { model: String, reason: String },
    #[error("invalid wire framing: {0}")]
    Framing(String),
    #[error("no schema for {model} v{version}")]
    UnknownVersion { model: String, version: u32 },
    #[error("invalid evolution of {model} to v{version}: {reason}")]
    Evolution {
        model: String,
        version: u32,
        reason: String,
    },
}

/// Errors from the schema registry adapter
#[derive(Error, Debug)]
pub enum SchemaRegistryError {
    #[error("schema for subject {subject} is incompatible: {}", reasons.join("; "))]
    Incompatible {
        subject: String,
        reasons: Vec<String>,
    },
    #[error("subject not found: {0}")]
    SubjectNotFound(String),
    #[error("version {version} not found for subject {subject}")]
    VersionNotFound { subject: String, version: u32 },
    #[error("schema id not found: {0}")]
    IdNotFound(u32),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status}: {body}")]
    Response { status: u16, body: String },
}
