//! Startup orchestration: migrate, resolve the enabled models, then bring
//! up each model's connector and producer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cryptics_metadata::{ConnectType, PipelineConfig, RegistryType, StoreType};
use cryptics_middleware::{Clock, MiddlewareFactory, SystemClock, Transport};
use cryptics_schema::{ConfluentSchemaRegistry, InMemorySchemaRegistry, SchemaRegistry};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::connector::{
    ConnectControl, ConnectorSettings, KafkaConnectClient, SinkConnector, SinkTarget,
};
use crate::error::PipelineError;
use crate::migration::{builtin_migrations, model_tables, MigrationEngine};
use crate::producer::DynProducer;
use crate::registry::{self, ComponentRegistry, ConnectorContext, ProducerContext, Registration};
use crate::server::PipelineHealth;
use crate::sink::LocalConnectWorker;
use crate::store::{InMemoryStore, MigrationStore, PostgresStore, RowSink};

/// Collaborators the pipeline runs against
#[derive(Clone)]
pub struct PipelineParts {
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<dyn SchemaRegistry>,
    pub control: Arc<dyn ConnectControl>,
    pub migrations: Arc<dyn MigrationStore>,
    pub clock: Arc<dyn Clock>,
    /// Set when connectors run in-process
    pub local_worker: Option<Arc<LocalConnectWorker>>,
}

impl PipelineParts {
    /// Build every collaborator the config names
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let transport = MiddlewareFactory::create_transport(config).await?;

        let registry: Arc<dyn SchemaRegistry> = match config.schema_registry.registry_type {
            RegistryType::Memory => Arc::new(InMemorySchemaRegistry::default()),
            RegistryType::Http => {
                let url = config.schema_registry.url.as_deref().ok_or_else(|| {
                    PipelineError::Config("schema_registry.url is required for http".to_string())
                })?;
                Arc::new(ConfluentSchemaRegistry::new(url))
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (migrations, rows): (Arc<dyn MigrationStore>, Arc<dyn RowSink>) =
            match config.store.store_type {
                StoreType::Memory => {
                    let store = Arc::new(InMemoryStore::new(Arc::clone(&clock)));
                    (store.clone(), store)
                }
                StoreType::Postgres => {
                    let url = config.store.url.as_deref().ok_or_else(|| {
                        PipelineError::Config("store.url is required for postgres".to_string())
                    })?;
                    let store = Arc::new(PostgresStore::connect(url)?);
                    (store.clone(), store)
                }
            };

        let (control, local_worker): (Arc<dyn ConnectControl>, _) = match config.connect.connect_type {
            ConnectType::Http => {
                let url = config.connect.url.as_deref().ok_or_else(|| {
                    PipelineError::Config("connect.url is required for http".to_string())
                })?;
                (Arc::new(KafkaConnectClient::new(url)), None)
            }
            ConnectType::Local => {
                let worker = Arc::new(LocalConnectWorker::new(
                    Arc::clone(&transport),
                    Arc::clone(&registry),
                    rows,
                    Arc::clone(&clock),
                ));
                (worker.clone(), Some(worker))
            }
        };

        Ok(Self {
            transport,
            registry,
            control,
            migrations,
            clock,
            local_worker,
        })
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    parts: PipelineParts,
    components: ComponentRegistry,
    health: Arc<PipelineHealth>,
}

impl Pipeline {
    /// Pipeline over the collaborators the config names, resolving models
    /// through the process-wide component registry
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let parts = PipelineParts::from_config(&config).await?;
        Ok(Self::from_parts(config, parts, registry::snapshot()))
    }

    pub fn from_parts(
        config: PipelineConfig,
        parts: PipelineParts,
        components: ComponentRegistry,
    ) -> Self {
        Self {
            config,
            parts,
            components,
            health: Arc::new(PipelineHealth::new()),
        }
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    async fn migrate(&self) -> Result<(), PipelineError> {
        if !self.config.run_migrations {
            info!("migrations disabled, assuming the schema is managed elsewhere");
            self.health.set_migrations_applied();
            return Ok(());
        }
        // Every built-in model gets its table, enabled or not. Tables for
        // models outside the built-in set are not managed here.
        let engine = MigrationEngine::new(
            Arc::clone(&self.parts.migrations),
            builtin_migrations(&model_tables(&self.config))?,
        )?;
        let applied = engine.run().await?;
        info!(applied = applied.len(), "schema migrated");
        self.health.set_migrations_applied();
        Ok(())
    }

    /// Connectors never create tables, so a model without one can only
    /// fail in its sink. Report it through health before anything runs.
    async fn check_tables(&self) {
        for model in &self.config.models {
            let table = self.config.binding(model).table;
            match self.parts.migrations.table_exists(&table).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(model = %model, table = %table, "table missing");
                    self.health
                        .record_error(model, format!("table {} does not exist", table));
                }
                Err(e) => warn!(model = %model, table = %table, error = %e, "table check failed"),
            }
        }
    }

    async fn reset_connectors(&self) {
        let names = match self.parts.control.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "could not list connectors for reset");
                return;
            }
        };
        for name in names {
            match self.parts.control.delete(&name).await {
                Ok(()) => info!(connector = %name, "connector removed on start"),
                Err(e) => warn!(connector = %name, error = %e, "connector removal failed"),
            }
        }
    }

    /// Bring the pipeline up. Migration and model resolution failures are
    /// fatal; a model whose connector or schema cannot be set up is
    /// reported through health while the other models keep running.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<RunningPipeline, PipelineError> {
        let registrations: Vec<(String, Registration)> = self
            .config
            .models
            .iter()
            .map(|model| -> Result<_, PipelineError> {
                Ok((model.clone(), self.components.resolve(model)?))
            })
            .collect::<Result<_, _>>()?;

        self.migrate().await?;
        self.check_tables().await;
        if self.config.connect.reset_on_start {
            self.reset_connectors().await;
        }

        let target = SinkTarget::from_config(&self.config)?;
        let settings = ConnectorSettings::from_config(&self.config.connect);
        let interval = Duration::from_millis(self.config.producer.interval_ms.max(1));
        let synthetic = self.config.producer.synthetic;

        let mut producers = HashMap::new();
        let mut connectors = HashMap::new();
        let mut tasks = Vec::with_capacity(registrations.len());
        for (model, registration) in registrations {
            let binding = self.config.binding(&model);
            let producer = (registration.producer)(ProducerContext {
                transport: Arc::clone(&self.parts.transport),
                registry: Arc::clone(&self.parts.registry),
                clock: Arc::clone(&self.parts.clock),
                binding: binding.clone(),
                settings: self.config.producer.clone(),
            });
            let connector = Arc::new((registration.connector)(ConnectorContext {
                binding,
                prefix: self.config.connect.name_prefix.clone(),
                target: target.clone(),
                control: Arc::clone(&self.parts.control),
                settings,
            }));
            self.health.watch_connector(&model, connector.subscribe());

            let launch = ModelLaunch {
                model: model.clone(),
                producer: Arc::clone(&producer),
                connector: Arc::clone(&connector),
                health: Arc::clone(&self.health),
                ready_timeout: settings.ready_timeout,
                synthetic: synthetic.then_some(interval),
            };
            tasks.push(tokio::spawn(launch.run(shutdown.clone())));
            producers.insert(model.clone(), producer);
            connectors.insert(model, connector);
        }
        info!(pipeline = %self.config.name, models = producers.len(), "pipeline started");

        Ok(RunningPipeline {
            producers,
            connectors,
            tasks,
            health: self.health,
            local_worker: self.parts.local_worker,
        })
    }
}

/// One model's startup sequence
struct ModelLaunch {
    model: String,
    producer: Arc<dyn DynProducer>,
    connector: Arc<SinkConnector>,
    health: Arc<PipelineHealth>,
    ready_timeout: Duration,
    synthetic: Option<Duration>,
}

impl ModelLaunch {
    async fn run(self, shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.producer.register_schema().await {
            error!(model = %self.model, error = %e, "schema registration failed");
            self.health.record_error(&self.model, e);
            return;
        }
        if let Err(e) = self.connector.declare().await {
            error!(model = %self.model, error = %e, "connector declaration failed");
            self.health.record_error(&self.model, e);
            return;
        }
        // Producers start either way; the bus holds data until the sink drains it
        match self.connector.wait_until_ready(self.ready_timeout).await {
            Ok(state) => info!(model = %self.model, state = %state, "connector ready"),
            Err(e) => warn!(model = %self.model, error = %e, "connector not ready, starting producer anyway"),
        }

        let supervisor = {
            let connector = Arc::clone(&self.connector);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { connector.supervise(shutdown).await })
        };
        if let Some(period) = self.synthetic {
            let produced = self.producer.run_synthetic(period, shutdown).await;
            info!(model = %self.model, produced, "synthetic producer stopped");
        }
        if let Err(e) = supervisor.await {
            error!(model = %self.model, error = %e, "connector supervisor panicked");
        }
    }
}

/// Handle to a started pipeline
pub struct RunningPipeline {
    producers: HashMap<String, Arc<dyn DynProducer>>,
    connectors: HashMap<String, Arc<SinkConnector>>,
    tasks: Vec<JoinHandle<()>>,
    health: Arc<PipelineHealth>,
    local_worker: Option<Arc<LocalConnectWorker>>,
}

impl RunningPipeline {
    pub fn producer(&self, model: &str) -> Option<Arc<dyn DynProducer>> {
        self.producers.get(model).cloned()
    }

    pub fn connector(&self, model: &str) -> Option<Arc<SinkConnector>> {
        self.connectors.get(model).cloned()
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    /// Wait for every model task to finish after shutdown, then stop any
    /// in-process sink tasks
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "model task panicked");
            }
        }
        if let Some(worker) = self.local_worker {
            worker.shutdown().await;
        }
        info!("pipeline stopped");
    }
}
