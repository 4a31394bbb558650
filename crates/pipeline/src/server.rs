//! HTTP server for health, readiness, and metrics endpoints

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use dashmap::DashMap;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::connector::ConnectorState;
use crate::metrics::encode_metrics;

/// What the pipeline reports about itself
#[derive(Default)]
pub struct PipelineHealth {
    migrations_applied: AtomicBool,
    connectors: DashMap<String, watch::Receiver<ConnectorState>>,
    errors: DashMap<String, String>,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_migrations_applied(&self) {
        self.migrations_applied.store(true, Ordering::SeqCst);
    }

    pub fn migrations_applied(&self) -> bool {
        self.migrations_applied.load(Ordering::SeqCst)
    }

    /// Track a model's connector state
    pub fn watch_connector(&self, model: &str, state: watch::Receiver<ConnectorState>) {
        self.connectors.insert(model.to_string(), state);
    }

    /// Record why a model could not start
    pub fn record_error(&self, model: &str, error: impl ToString) {
        self.errors.insert(model.to_string(), error.to_string());
    }

    pub fn connector_states(&self) -> BTreeMap<String, ConnectorState> {
        self.connectors
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value().borrow()))
            .collect()
    }

    pub fn errors(&self) -> BTreeMap<String, String> {
        self.errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Ready once migrations ran and every connector is serving.
    /// Degraded connectors still count as ready.
    pub fn readiness(&self) -> Readiness {
        if !self.migrations_applied() || !self.errors.is_empty() {
            return Readiness::NotReady;
        }
        let states = self.connector_states();
        if states.is_empty() || !states.values().all(|s| s.is_serving()) {
            return Readiness::NotReady;
        }
        if states.values().any(|s| *s == ConnectorState::Degraded) {
            Readiness::Degraded
        } else {
            Readiness::Ready
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
    NotReady,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub pipeline: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: Readiness,
    pub pipeline: String,
    pub migrations_applied: bool,
    pub connectors: BTreeMap<String, ConnectorState>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub pipeline: String,
    pub health: Arc<PipelineHealth>,
}

impl ServerState {
    pub fn new(pipeline: impl Into<String>, health: Arc<PipelineHealth>) -> Self {
        Self {
            pipeline: pipeline.into(),
            health,
        }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        pipeline: state.pipeline.clone(),
    })
}

/// Ready endpoint - 200 when ready or degraded, 503 otherwise
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<ReadyResponse>) {
    let readiness = state.health.readiness();
    let status_code = match readiness {
        Readiness::Ready | Readiness::Degraded => StatusCode::OK,
        Readiness::NotReady => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(ReadyResponse {
            status: readiness,
            pipeline: state.pipeline.clone(),
            migrations_applied: state.health.migrations_applied(),
            connectors: state.health.connector_states(),
            errors: state.health.errors(),
        }),
    )
}

/// Metrics endpoint - returns Prometheus text format
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server until `shutdown` flips
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_state(health: PipelineHealth) -> ServerState {
        ServerState::new("cryptics-test", Arc::new(health))
    }

    fn with_connector(health: &PipelineHealth, model: &str, state: ConnectorState) -> watch::Sender<ConnectorState> {
        let (tx, rx) = watch::channel(state);
        health.watch_connector(model, rx);
        tx
    }

    async fn get_ready(state: ServerState) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let app = create_router(create_test_state(PipelineHealth::new()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_ready_before_migrations() {
        let health = PipelineHealth::new();
        let _tx = with_connector(&health, "ticker", ConnectorState::Running);

        let (status, body) = get_ready(create_test_state(health)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["migrations_applied"], false);
    }

    #[tokio::test]
    async fn test_ready_follows_connector_state() {
        let health = PipelineHealth::new();
        health.set_migrations_applied();
        let ticker = with_connector(&health, "ticker", ConnectorState::Pending);
        let _ack = with_connector(&health, "ack", ConnectorState::Running);
        let state = create_test_state(health);

        let (status, body) = get_ready(state.clone()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["connectors"]["ticker"], "pending");

        ticker.send_replace(ConnectorState::Running);
        let (status, body) = get_ready(state.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        ticker.send_replace(ConnectorState::Degraded);
        let (status, body) = get_ready(state.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");

        ticker.send_replace(ConnectorState::Failed);
        let (status, _) = get_ready(state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_model_error_reported() {
        let health = PipelineHealth::new();
        health.set_migrations_applied();
        let _tx = with_connector(&health, "ticker", ConnectorState::Running);
        health.record_error("trade", "schema registration failed");

        let (status, body) = get_ready(create_test_state(health)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["errors"]["trade"], "schema registration failed");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(create_test_state(PipelineHealth::new()));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }
}
