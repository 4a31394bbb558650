use std::collections::HashMap;
use std::sync::Mutex;

use apache_avro::Schema;
use async_trait::async_trait;
use tracing::debug;

use super::{RegisteredSchema, SchemaRegistry};
use crate::compatibility::{CompatibilityChecker, CompatibilityLevel};
use crate::error::SchemaRegistryError;

#[derive(Default)]
struct Inner {
    subjects: HashMap<String, Vec<RegisteredSchema>>,
    by_id: HashMap<u32, String>,
    next_id: u32,
}

/// Process-local registry with the same compatibility rules as the
/// HTTP registry. Ids start at 1 and are shared across subjects.
pub struct InMemorySchemaRegistry {
    checker: CompatibilityChecker,
    inner: Mutex<Inner>,
}

impl InMemorySchemaRegistry {
    pub fn new(level: CompatibilityLevel) -> Self {
        Self {
            checker: CompatibilityChecker::new(level),
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn parse(document: &str) -> Result<Schema, SchemaRegistryError> {
        Schema::parse_str(document).map_err(|e| SchemaRegistryError::InvalidSchema(e.to_string()))
    }
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new(CompatibilityLevel::Full)
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register(&self, subject: &str, document: &str) -> Result<u32, SchemaRegistryError> {
        let candidate = Self::parse(document)?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(versions) = inner.subjects.get(subject) {
            for existing in versions {
                if Self::parse(&existing.document)? == candidate {
                    return Ok(existing.id);
                }
            }
            if let Some(latest) = versions.last() {
                let reasons = self.checker.check(&candidate, &Self::parse(&latest.document)?);
                if !reasons.is_empty() {
                    return Err(SchemaRegistryError::Incompatible {
                        subject: subject.to_string(),
                        reasons,
                    });
                }
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_id.insert(id, document.to_string());
        let versions = inner.subjects.entry(subject.to_string()).or_default();
        let version = versions.len() as u32 + 1;
        versions.push(RegisteredSchema {
            subject: subject.to_string(),
            id,
            version,
            document: document.to_string(),
        });
        debug!(subject, id, version, "registered schema");
        Ok(id)
    }

    async fn get(
        &self,
        subject: &str,
        version: u32,
    ) -> Result<RegisteredSchema, SchemaRegistryError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let versions = inner
            .subjects
            .get(subject)
            .ok_or_else(|| SchemaRegistryError::SubjectNotFound(subject.to_string()))?;
        versions
            .iter()
            .find(|s| s.version == version)
            .cloned()
            .ok_or_else(|| SchemaRegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            })
    }

    async fn get_by_id(&self, id: u32) -> Result<String, SchemaRegistryError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaRegistryError::IdNotFound(id))
    }

    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, SchemaRegistryError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .subjects
            .get(subject)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| SchemaRegistryError::SubjectNotFound(subject.to_string()))
    }
}
