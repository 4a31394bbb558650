use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{RegisteredSchema, SchemaRegistry};
use crate::compatibility::CompatibilityLevel;
use crate::error::SchemaRegistryError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

// Confluent error codes carried in 404 bodies
const SUBJECT_NOT_FOUND: i64 = 40401;
const VERSION_NOT_FOUND: i64 = 40402;

#[derive(Deserialize)]
struct IdResponse {
    id: u32,
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error_code: i64,
    #[serde(default)]
    message: String,
}

/// Client for a Confluent-compatible schema registry REST API
pub struct ConfluentSchemaRegistry {
    http: Client,
    base_url: String,
}

impl ConfluentSchemaRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Pin the compatibility level of a subject
    pub async fn set_compatibility(
        &self,
        subject: &str,
        level: CompatibilityLevel,
    ) -> Result<(), SchemaRegistryError> {
        let resp = self
            .http
            .put(self.url(&format!("/config/{}", subject)))
            .header("Content-Type", CONTENT_TYPE)
            .json(&json!({ "compatibility": level.to_string() }))
            .send()
            .await?;
        Self::check(resp).await?;
        info!(subject, level = %level, "set subject compatibility");
        Ok(())
    }

    /// Map non-success statuses to registry errors
    async fn check(resp: Response) -> Result<Response, SchemaRegistryError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SchemaRegistryError::Response {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch_version(
        &self,
        subject: &str,
        version: &str,
    ) -> Result<RegisteredSchema, SchemaRegistryError> {
        let url = self.url(&format!("/subjects/{}/versions/{}", subject, version));
        debug!(url = %url, "GET schema version");
        let resp = self.http.get(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            let code = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error_code)
                .unwrap_or(SUBJECT_NOT_FOUND);
            return Err(match (code, version.parse::<u32>()) {
                (VERSION_NOT_FOUND, Ok(v)) => SchemaRegistryError::VersionNotFound {
                    subject: subject.to_string(),
                    version: v,
                },
                _ => SchemaRegistryError::SubjectNotFound(subject.to_string()),
            });
        }

        Ok(Self::check(resp).await?.json::<RegisteredSchema>().await?)
    }
}

#[async_trait]
impl SchemaRegistry for ConfluentSchemaRegistry {
    async fn register(&self, subject: &str, document: &str) -> Result<u32, SchemaRegistryError> {
        let url = self.url(&format!("/subjects/{}/versions", subject));
        debug!(url = %url, "POST schema");
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", CONTENT_TYPE)
            .json(&json!({ "schema": document }))
            .send()
            .await?;

        match resp.status() {
            StatusCode::CONFLICT => {
                let body = resp.text().await.unwrap_or_default();
                let reason = serde_json::from_str::<ErrorResponse>(&body)
                    .map(|e| e.message)
                    .unwrap_or(body);
                Err(SchemaRegistryError::Incompatible {
                    subject: subject.to_string(),
                    reasons: vec![reason],
                })
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = resp.text().await.unwrap_or_default();
                Err(SchemaRegistryError::InvalidSchema(body))
            }
            _ => {
                let registered: IdResponse = Self::check(resp).await?.json().await?;
                Ok(registered.id)
            }
        }
    }

    async fn get(
        &self,
        subject: &str,
        version: u32,
    ) -> Result<RegisteredSchema, SchemaRegistryError> {
        self.fetch_version(subject, &version.to_string()).await
    }

    async fn get_by_id(&self, id: u32) -> Result<String, SchemaRegistryError> {
        let resp = self
            .http
            .get(self.url(&format!("/schemas/ids/{}", id)))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SchemaRegistryError::IdNotFound(id));
        }
        let schema: SchemaResponse = Self::check(resp).await?.json().await?;
        Ok(schema.schema)
    }

    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, SchemaRegistryError> {
        self.fetch_version(subject, "latest").await
    }
}
