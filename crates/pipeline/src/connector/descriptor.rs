use std::collections::BTreeMap;

use cryptics_metadata::{PipelineConfig, TopicBinding};

use crate::error::ConnectorError;

/// Config keys the worker adds on its own and that never count as drift
const WORKER_MANAGED_KEYS: [&str; 1] = ["name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Upsert,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Upsert => "upsert",
        }
    }
}

/// Where the sink writes and how it reaches the schema registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTarget {
    pub jdbc_url: String,
    pub user: String,
    pub password: String,
    pub db_schema: String,
    pub schema_registry_url: String,
    pub batch_size: u32,
}

impl SinkTarget {
    pub const DEFAULT_BATCH_SIZE: u32 = 100;

    /// Derive the sink target from pipeline config. Credentials come from
    /// the store URL; the JDBC URL is derived from it unless set explicitly.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConnectorError> {
        let schema_registry_url = config
            .schema_registry
            .internal_url
            .clone()
            .or_else(|| config.schema_registry.url.clone())
            .unwrap_or_default();

        let (mut jdbc_url, mut user, mut password) = (String::new(), String::new(), String::new());
        if let Some(url) = config.store.url.as_deref() {
            let pg: tokio_postgres::Config = url
                .parse()
                .map_err(|e: tokio_postgres::Error| {
                    ConnectorError::Config(format!("invalid store URL: {}", e))
                })?;
            let host = match pg.get_hosts().first() {
                Some(tokio_postgres::config::Host::Tcp(h)) => h.clone(),
                _ => "localhost".to_string(),
            };
            let port = pg.get_ports().first().copied().unwrap_or(5432);
            let dbname = pg.get_dbname().unwrap_or("postgres");
            jdbc_url = format!("jdbc:postgresql://{}:{}/{}", host, port, dbname);
            user = pg.get_user().unwrap_or_default().to_string();
            password = pg
                .get_password()
                .map(|p| String::from_utf8_lossy(p).to_string())
                .unwrap_or_default();
        }
        if let Some(explicit) = &config.store.jdbc_url {
            jdbc_url = explicit.clone();
        }

        Ok(Self {
            jdbc_url,
            user,
            password,
            db_schema: config.store.schema.clone(),
            schema_registry_url,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        })
    }
}

/// Declarative description of one sink connector.
/// Changed only by resubmitting the whole descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorDescriptor {
    pub name: String,
    pub topic: String,
    pub table: String,
    pub primary_keys: Vec<String>,
    pub write_mode: WriteMode,
    pub auto_create: bool,
    pub auto_evolve: bool,
}

impl ConnectorDescriptor {
    /// Tables keyed by the store-assigned `id` are append-only; any other
    /// key set is upserted on the record value.
    pub fn new(prefix: &str, binding: &TopicBinding, primary_keys: &[&str]) -> Self {
        let write_mode = if primary_keys == ["id"] {
            WriteMode::Insert
        } else {
            WriteMode::Upsert
        };
        Self {
            name: format!("{}-{}", prefix, binding.model),
            topic: binding.topic.clone(),
            table: binding.table.clone(),
            primary_keys: primary_keys.iter().map(|k| k.to_string()).collect(),
            write_mode,
            // Tables are owned by the migration engine
            auto_create: false,
            auto_evolve: false,
        }
    }

    /// Render the flat property map a JDBC sink worker expects
    pub fn to_config(&self, target: &SinkTarget) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            config.insert(k.to_string(), v);
        };

        set(
            "connector.class",
            "io.confluent.connect.jdbc.JdbcSinkConnector".to_string(),
        );
        set("tasks.max", "1".to_string());
        set("topics", self.topic.clone());
        set("connection.url", target.jdbc_url.clone());
        set("connection.user", target.user.clone());
        set("connection.password", target.password.clone());
        set(
            "table.name.format",
            format!("{}.{}", target.db_schema, self.table),
        );
        set("auto.create", self.auto_create.to_string());
        set("auto.evolve", self.auto_evolve.to_string());
        set("insert.mode", self.write_mode.as_str().to_string());
        if self.write_mode == WriteMode::Upsert {
            set("pk.mode", "record_value".to_string());
            set("pk.fields", self.primary_keys.join(","));
        }
        set("errors.tolerance", "all".to_string());
        set("errors.log.enable", "true".to_string());
        set("batch.size", target.batch_size.to_string());
        set(
            "key.converter",
            "org.apache.kafka.connect.storage.StringConverter".to_string(),
        );
        set(
            "value.converter",
            "io.confluent.connect.avro.AvroConverter".to_string(),
        );
        set(
            "value.converter.schema.registry.url",
            target.schema_registry_url.clone(),
        );
        config
    }
}

/// Keys whose values differ between the desired and the deployed config,
/// sorted. Worker-managed keys are ignored.
pub fn config_diff(
    desired: &BTreeMap<String, String>,
    deployed: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut keys: Vec<String> = desired
        .iter()
        .filter(|(k, v)| deployed.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(
        deployed
            .keys()
            .filter(|k| !desired.contains_key(*k) && !WORKER_MANAGED_KEYS.contains(&k.as_str()))
            .cloned(),
    );
    keys.sort();
    keys
}

/// Target table of a rendered config, without the schema qualifier
pub fn table_of(config: &BTreeMap<String, String>) -> Result<String, ConnectorError> {
    let format = config
        .get("table.name.format")
        .ok_or_else(|| ConnectorError::Config("table.name.format is required".to_string()))?;
    Ok(format
        .rsplit_once('.')
        .map(|(_, table)| table)
        .unwrap_or(format.as_str())
        .to_string())
}
