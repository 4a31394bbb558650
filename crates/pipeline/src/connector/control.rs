//! Connector control API: the REST surface of a Kafka Connect style worker

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::ConnectorEvent;
use crate::error::ConnectorError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const STATE_RUNNING: &str = "RUNNING";
pub const STATE_FAILED: &str = "FAILED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: u32,
    #[serde(flatten)]
    pub status: WorkerState,
}

/// Body of `GET /connectors/{name}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorStatus {
    pub name: String,
    pub connector: WorkerState,
    #[serde(default)]
    pub tasks: Vec<TaskStatus>,
}

impl ConnectorStatus {
    /// Translate a status report into a state machine event.
    /// `None` means the worker is still settling (no tasks yet, unassigned,
    /// restarting) and the state should not change.
    pub fn classify(&self) -> Option<ConnectorEvent> {
        if self.connector.state == STATE_FAILED {
            return Some(ConnectorEvent::ErrorPoll {
                reason: self
                    .connector
                    .trace
                    .clone()
                    .unwrap_or_else(|| "connector FAILED".to_string()),
            });
        }
        if self.connector.state != STATE_RUNNING || self.tasks.is_empty() {
            return None;
        }

        let failed: Vec<&TaskStatus> = self
            .tasks
            .iter()
            .filter(|t| t.status.state == STATE_FAILED)
            .collect();
        let running = self
            .tasks
            .iter()
            .filter(|t| t.status.state == STATE_RUNNING)
            .count();

        if failed.len() == self.tasks.len() {
            let reason = failed
                .iter()
                .map(|t| {
                    format!(
                        "task {}: {}",
                        t.id,
                        t.status.trace.as_deref().unwrap_or(STATE_FAILED)
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            Some(ConnectorEvent::ErrorPoll { reason })
        } else if !failed.is_empty() {
            Some(ConnectorEvent::DegradedPoll {
                failed_tasks: failed.len(),
            })
        } else if running == self.tasks.len() {
            Some(ConnectorEvent::HealthyPoll)
        } else {
            None
        }
    }
}

/// Operations on a connect worker
#[async_trait]
pub trait ConnectControl: Send + Sync {
    /// Create or replace a connector's config (`PUT /connectors/{name}/config`)
    async fn put_config(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), ConnectorError>;

    /// Deployed config, or `None` if the connector does not exist
    async fn get_config(&self, name: &str)
        -> Result<Option<BTreeMap<String, String>>, ConnectorError>;

    async fn status(&self, name: &str) -> Result<ConnectorStatus, ConnectorError>;

    async fn restart(&self, name: &str) -> Result<(), ConnectorError>;

    async fn list(&self) -> Result<Vec<String>, ConnectorError>;

    async fn delete(&self, name: &str) -> Result<(), ConnectorError>;
}

/// HTTP client for a Kafka Connect REST API
pub struct KafkaConnectClient {
    http: Client,
    base_url: String,
}

impl KafkaConnectClient {
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

    async fn check(name: &str, resp: Response) -> Result<Response, ConnectorError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ConnectorError::NotFound(name.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ConnectorError::Response {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ConnectControl for KafkaConnectClient {
    async fn put_config(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<(), ConnectorError> {
        let url = self.url(&format!("/connectors/{}/config", name));
        debug!(url = %url, "PUT connector config");
        let resp = self.http.put(&url).json(config).send().await?;
        Self::check(name, resp).await?;
        Ok(())
    }

    async fn get_config(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ConnectorError> {
        let resp = self
            .http
            .get(self.url(&format!("/connectors/{}/config", name)))
            .send()
            .await?;
        match Self::check(name, resp).await {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn status(&self, name: &str) -> Result<ConnectorStatus, ConnectorError> {
        let resp = self
            .http
            .get(self.url(&format!("/connectors/{}/status", name)))
            .send()
            .await?;
        Ok(Self::check(name, resp).await?.json().await?)
    }

    async fn restart(&self, name: &str) -> Result<(), ConnectorError> {
        let resp = self
            .http
            .post(self.url(&format!("/connectors/{}/restart", name)))
            .query(&[("includeTasks", "true"), ("onlyFailed", "true")])
            .send()
            .await?;
        Self::check(name, resp).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ConnectorError> {
        let resp = self.http.get(self.url("/connectors")).send().await?;
        Ok(Self::check("*", resp).await?.json().await?)
    }

    async fn delete(&self, name: &str) -> Result<(), ConnectorError> {
        let resp = self
            .http
            .delete(self.url(&format!("/connectors/{}", name)))
            .send()
            .await?;
        Self::check(name, resp).await?;
        Ok(())
    }
}
