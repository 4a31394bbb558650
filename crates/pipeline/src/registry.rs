//! Component Registry: the single extension point for data types.
//!
//! Maps a model key to a constructor pair (producer, connector). The
//! process-wide table is built once from the built-in models and may be
//! amended before the pipeline starts, e.g. to install test doubles.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use cryptics_metadata::{ProducerConfig, TopicBinding};
use cryptics_middleware::{Clock, Transport};
use cryptics_schema::{Ack, Model, Order, PriceIndex, SchemaRegistry, SchemaSet, Ticker, Trade};
use once_cell::sync::Lazy;
use tracing::debug;

use crate::connector::{
    ConnectControl, ConnectorDescriptor, ConnectorSettings, SinkConnector, SinkTarget,
};
use crate::error::UnknownModelError;
use crate::producer::{DynProducer, Producer};

/// Built-in models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Ticker,
    Ack,
    Trade,
    Index,
    Order,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Ticker,
        ModelKind::Ack,
        ModelKind::Trade,
        ModelKind::Index,
        ModelKind::Order,
    ];

    pub fn from_key(key: &str) -> Result<Self, UnknownModelError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.key() == key)
            .ok_or_else(|| UnknownModelError(key.to_string()))
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Ticker => Ticker::NAME,
            Self::Ack => Ack::NAME,
            Self::Trade => Trade::NAME,
            Self::Index => PriceIndex::NAME,
            Self::Order => Order::NAME,
        }
    }

    pub fn schemas(self) -> &'static SchemaSet {
        match self {
            Self::Ticker => Ticker::schemas(),
            Self::Ack => Ack::schemas(),
            Self::Trade => Trade::schemas(),
            Self::Index => PriceIndex::schemas(),
            Self::Order => Order::schemas(),
        }
    }

    /// Table primary key. Orders are snapshots keyed by their identity and
    /// upserted; everything else is an append-only event log.
    pub fn primary_keys(self) -> &'static [&'static str] {
        match self {
            Self::Order => &["order_id", "create_time"],
            _ => &["id"],
        }
    }

    /// Field holding the exchange-side event time
    pub fn source_time_field(self) -> &'static str {
        match self {
            Self::Ticker => "mark_timestamp",
            Self::Ack | Self::Order => "create_time",
            Self::Trade => "time",
            Self::Index => "timestamp",
        }
    }

    fn registration(self) -> Registration {
        let keys = self.primary_keys();
        match self {
            Self::Ticker => Registration::for_model::<Ticker>(keys),
            Self::Ack => Registration::for_model::<Ack>(keys),
            Self::Trade => Registration::for_model::<Trade>(keys),
            Self::Index => Registration::for_model::<PriceIndex>(keys),
            Self::Order => Registration::for_model::<Order>(keys),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Everything a producer constructor gets
#[derive(Clone)]
pub struct ProducerContext {
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<dyn SchemaRegistry>,
    pub clock: Arc<dyn Clock>,
    pub binding: TopicBinding,
    pub settings: ProducerConfig,
}

/// Everything a connector constructor gets
#[derive(Clone)]
pub struct ConnectorContext {
    pub binding: TopicBinding,
    pub prefix: String,
    pub target: SinkTarget,
    pub control: Arc<dyn ConnectControl>,
    pub settings: ConnectorSettings,
}

pub type ProducerCtor = Arc<dyn Fn(ProducerContext) -> Arc<dyn DynProducer> + Send + Sync>;
pub type ConnectorCtor = Arc<dyn Fn(ConnectorContext) -> SinkConnector + Send + Sync>;

/// Constructor pair for one model key
#[derive(Clone)]
pub struct Registration {
    pub producer: ProducerCtor,
    pub connector: ConnectorCtor,
}

impl Registration {
    pub fn new(producer: ProducerCtor, connector: ConnectorCtor) -> Self {
        Self {
            producer,
            connector,
        }
    }

    /// Typed producer for `M` and a JDBC sink connector keyed on `primary_keys`
    pub fn for_model<M: Model>(primary_keys: &'static [&'static str]) -> Self {
        let producer: ProducerCtor = Arc::new(|ctx: ProducerContext| {
            Arc::new(Producer::<M>::new(ctx)) as Arc<dyn DynProducer>
        });
        let connector: ConnectorCtor = Arc::new(move |ctx: ConnectorContext| {
            let descriptor = ConnectorDescriptor::new(&ctx.prefix, &ctx.binding, primary_keys);
            let config = descriptor.to_config(&ctx.target);
            SinkConnector::new(descriptor, config, ctx.control, ctx.settings)
        });
        Self::new(producer, connector)
    }
}

#[derive(Clone, Default)]
pub struct ComponentRegistry {
    entries: HashMap<String, Registration>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in model
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ModelKind::ALL {
            registry.register(kind.key(), kind.registration());
        }
        registry
    }

    /// Last writer wins
    pub fn register(&mut self, key: impl Into<String>, registration: Registration) {
        let key = key.into();
        if self.entries.insert(key.clone(), registration).is_some() {
            debug!(model = %key, "registration replaced");
        }
    }

    pub fn resolve(&self, key: &str) -> Result<Registration, UnknownModelError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| UnknownModelError(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

static GLOBAL: Lazy<RwLock<ComponentRegistry>> =
    Lazy::new(|| RwLock::new(ComponentRegistry::with_defaults()));

/// The process-wide registry
pub fn global() -> &'static RwLock<ComponentRegistry> {
    &GLOBAL
}

/// Register into the process-wide registry. Call before the pipeline starts.
pub fn register(key: impl Into<String>, registration: Registration) {
    GLOBAL
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .register(key, registration);
}

pub fn resolve(key: &str) -> Result<Registration, UnknownModelError> {
    GLOBAL.read().unwrap_or_else(|e| e.into_inner()).resolve(key)
}

/// Copy of the process-wide registry, taken once at pipeline start
pub fn snapshot() -> ComponentRegistry {
    GLOBAL.read().unwrap_or_else(|e| e.into_inner()).clone()
}
