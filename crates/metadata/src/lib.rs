//! cryptics-metadata: Pipeline configuration and topic bindings

pub mod binding;
pub mod config;
pub mod error;

pub use binding::TopicBinding;
pub use config::{
    BindingOverride, ConnectConfig, ConnectType, PipelineConfig, ProducerConfig, RegistryType,
    SchemaRegistryConfig, StoreConfig, StoreType, TransportConfig, TransportType,
};
pub use error::MetadataError;
