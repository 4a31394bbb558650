use std::sync::Arc;

use cryptics_metadata::{PipelineConfig, TransportType};
use tracing::info;

use crate::error::TransportError;
use crate::memory::InMemoryTransport;
use crate::nats::NatsTransport;
use crate::topics::TopicBuilder;
use crate::transport::Transport;

/// Error creating middleware
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Factory for creating middleware instances based on pipeline config
pub struct MiddlewareFactory;

impl MiddlewareFactory {
    /// Create the bus transport. For NATS this connects and makes sure the
    /// namespace stream exists before returning.
    pub async fn create_transport(
        config: &PipelineConfig,
    ) -> Result<Arc<dyn Transport>, FactoryError> {
        match config.transport.transport_type {
            TransportType::Memory => Ok(Arc::new(InMemoryTransport::new())),
            TransportType::Nats => {
                let url = config.transport.url.as_deref().ok_or_else(|| {
                    FactoryError::ConfigError("transport.url is required for nats".to_string())
                })?;
                let transport = NatsTransport::connect(url, config.transport.partitions).await?;
                let topics = Self::topic_builder(config);
                transport
                    .ensure_stream(topics.stream_name(), vec![topics.all().to_string()])
                    .await?;
                info!(
                    url,
                    stream = topics.stream_name(),
                    partitions = config.transport.partitions,
                    "connected to NATS"
                );
                Ok(Arc::new(transport))
            }
        }
    }

    pub fn topic_builder(config: &PipelineConfig) -> TopicBuilder {
        TopicBuilder::with_stream(
            config.namespace.clone(),
            config.encoding.clone(),
            config.stream_name(),
        )
    }
}
