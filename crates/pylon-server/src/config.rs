//! Configuration management for the Pylon server
//!
//! Values come from `conf/application.yml`, then environment variables of
//! the form `PYLON__REGISTRY__MODE` (mapping to `pylon.registry.mode`), then
//! command line overrides.

use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment};
use pylon_common::{DEFAULT_API_VERSION, DEFAULT_KEY_PREFIX};
use pylon_persistence::StorageMode;
use pylon_publish::PublisherConfig;
use pylon_registry::EtcdConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::cli::Cli;
use crate::startup::LoggingConfig;

pub const PERSISTENCE_MODE: &str = "pylon.persistence.mode";
pub const DB_URL: &str = "db.url";
pub const REGISTRY_MODE: &str = "pylon.registry.mode";
pub const REGISTRY_ENDPOINTS: &str = "pylon.registry.endpoints";
pub const REGISTRY_CONNECT_TIMEOUT_MS: &str = "pylon.registry.connect_timeout_ms";
pub const REGISTRY_TIMEOUT_MS: &str = "pylon.registry.timeout_ms";
pub const REGISTRY_KEY_PREFIX: &str = "pylon.registry.key_prefix";
pub const REGISTRY_API_VERSION: &str = "pylon.registry.api_version";
pub const WORKER_SWEEP_INTERVAL_MS: &str = "pylon.worker.sweep_interval_ms";

const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5000;

/// Where published resources are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Etcd,
    /// Process-local store, for trying the pipeline out
    Memory,
}

impl std::fmt::Display for RegistryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryMode::Etcd => write!(f, "etcd"),
            RegistryMode::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for RegistryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(RegistryMode::Etcd),
            "memory" => Ok(RegistryMode::Memory),
            _ => Err(format!("Unknown registry mode: {}", s)),
        }
    }
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut overrides = Vec::new();
        if let Some(url) = &cli.database_url {
            overrides.push((DB_URL, url.clone()));
        }
        if let Some(endpoints) = &cli.registry_endpoints {
            overrides.push((REGISTRY_ENDPOINTS, endpoints.clone()));
        }
        Self::load(&cli.config, overrides)
    }

    /// Load `path` (optional on disk) with environment and explicit overrides
    pub fn load(path: &str, overrides: Vec<(&str, String)>) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("pylon")
                    .prefix_separator("__")
                    .separator("__")
                    .keep_prefix(true)
                    .try_parsing(true),
            );
        for (key, value) in overrides {
            builder = builder
                .set_override(key, value)
                .with_context(|| format!("Failed to set override for {}", key))?;
        }

        let config = builder
            .build()
            .with_context(|| format!("Failed to build configuration - check {}", path))?;
        Ok(Self { config })
    }

    // ========================================================================
    // Persistence Configuration
    // ========================================================================

    /// Storage backend; an external database when a URL is configured
    pub fn persistence_mode(&self) -> anyhow::Result<StorageMode> {
        match self.config.get_string(PERSISTENCE_MODE) {
            Ok(mode) => mode.parse().map_err(|e: String| anyhow::anyhow!(e)),
            Err(_) if self.config.get_string(DB_URL).is_ok() => Ok(StorageMode::ExternalDb),
            Err(_) => Ok(StorageMode::Memory),
        }
    }

    pub async fn database_connection(&self) -> anyhow::Result<DatabaseConnection> {
        let max_connections = self
            .config
            .get_int("db.pool.config.maximumPoolSize")
            .unwrap_or(20) as u32;
        let min_connections = self
            .config
            .get_int("db.pool.config.minimumPoolSize")
            .unwrap_or(1) as u32;
        let connect_timeout = self
            .config
            .get_int("db.pool.config.connectionTimeout")
            .unwrap_or(30) as u64;
        let acquire_timeout = self
            .config
            .get_int("db.pool.config.initializationFailTimeout")
            .unwrap_or(8) as u64;
        let idle_timeout = self
            .config
            .get_int("db.pool.config.idleTimeout")
            .unwrap_or(10) as u64;
        let max_lifetime = self
            .config
            .get_int("db.pool.config.maxLifetime")
            .unwrap_or(1800) as u64;
        let sqlx_logging = self
            .config
            .get_bool("db.pool.config.sqlxLogging")
            .unwrap_or(false);

        let url = self
            .config
            .get_string(DB_URL)
            .context("db.url is required for the external_db persistence mode")?;

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .acquire_timeout(Duration::from_secs(acquire_timeout))
            .idle_timeout(Duration::from_secs(idle_timeout))
            .max_lifetime(Duration::from_secs(max_lifetime))
            .sqlx_logging(sqlx_logging)
            .sqlx_logging_level(tracing::log::LevelFilter::Debug);

        tracing::info!(
            max_connections = max_connections,
            min_connections = min_connections,
            connect_timeout_secs = connect_timeout,
            "Database connection pool configured"
        );

        Ok(Database::connect(opt).await?)
    }

    // ========================================================================
    // Registry Configuration
    // ========================================================================

    pub fn registry_mode(&self) -> anyhow::Result<RegistryMode> {
        match self.config.get_string(REGISTRY_MODE) {
            Ok(mode) => mode.parse().map_err(|e: String| anyhow::anyhow!(e)),
            Err(_) => Ok(RegistryMode::Etcd),
        }
    }

    /// Endpoints given either as a list or as one comma separated string
    pub fn registry_endpoints(&self) -> Vec<String> {
        let endpoints: Vec<String> = match self.config.get_array(REGISTRY_ENDPOINTS) {
            Ok(values) => values
                .into_iter()
                .filter_map(|v| v.into_string().ok())
                .collect(),
            Err(_) => self
                .config
                .get_string(REGISTRY_ENDPOINTS)
                .map(|s| s.split(',').map(|e| e.trim().to_string()).collect())
                .unwrap_or_default(),
        };
        endpoints.into_iter().filter(|e| !e.is_empty()).collect()
    }

    pub fn etcd_config(&self) -> EtcdConfig {
        let defaults = EtcdConfig::default();
        let endpoints = self.registry_endpoints();
        EtcdConfig {
            endpoints: if endpoints.is_empty() {
                defaults.endpoints
            } else {
                endpoints
            },
            connect_timeout_ms: self
                .config
                .get_int(REGISTRY_CONNECT_TIMEOUT_MS)
                .map(|v| v as u64)
                .unwrap_or(defaults.connect_timeout_ms),
            request_timeout_ms: self
                .config
                .get_int(REGISTRY_TIMEOUT_MS)
                .map(|v| v as u64)
                .unwrap_or(defaults.request_timeout_ms),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            key_prefix: self
                .config
                .get_string(REGISTRY_KEY_PREFIX)
                .unwrap_or(DEFAULT_KEY_PREFIX.to_string()),
            api_version: self
                .config
                .get_string(REGISTRY_API_VERSION)
                .unwrap_or(DEFAULT_API_VERSION.to_string()),
        }
    }

    // ========================================================================
    // Worker Configuration
    // ========================================================================

    pub fn sweep_interval_ms(&self) -> u64 {
        self.config
            .get_int(WORKER_SWEEP_INTERVAL_MS)
            .map(|v| v.max(1) as u64)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_MS)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    /// Logging settings from `pylon.logs.*`, overridden by `PYLON_LOG_*`
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("pylon.logs.path").ok(),
            self.config.get_bool("pylon.logs.console").unwrap_or(true),
            self.config.get_bool("pylon.logs.file").unwrap_or(true),
            self.config
                .get_string("pylon.logs.level")
                .unwrap_or("info".to_string()),
        )
        .with_env_overrides()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn load_yaml(yaml: &str) -> Configuration {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        Configuration::load(file.path().to_str().unwrap(), Vec::new()).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let configuration =
            Configuration::load("/nonexistent/pylon/application.yml", Vec::new()).unwrap();
        assert_eq!(configuration.persistence_mode().unwrap(), StorageMode::Memory);
        assert_eq!(configuration.registry_mode().unwrap(), RegistryMode::Etcd);
        assert_eq!(configuration.sweep_interval_ms(), DEFAULT_SWEEP_INTERVAL_MS);

        let publisher = configuration.publisher_config();
        assert_eq!(publisher.key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(publisher.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_load_from_file() {
        let configuration = load_yaml(
            r#"
pylon:
  persistence:
    mode: memory
  registry:
    mode: memory
    endpoints:
      - http://10.0.0.1:2379
      - http://10.0.0.2:2379
    timeout_ms: 500
    key_prefix: /gateways
  worker:
    sweep_interval_ms: 250
"#,
        );
        assert_eq!(configuration.persistence_mode().unwrap(), StorageMode::Memory);
        assert_eq!(configuration.registry_mode().unwrap(), RegistryMode::Memory);
        assert_eq!(configuration.sweep_interval_ms(), 250);
        assert_eq!(configuration.publisher_config().key_prefix, "/gateways");

        let etcd = configuration.etcd_config();
        assert_eq!(etcd.endpoints.len(), 2);
        assert_eq!(etcd.request_timeout_ms, 500);
        assert_eq!(etcd.connect_timeout_ms, EtcdConfig::default().connect_timeout_ms);
    }

    #[test]
    fn test_overrides_win() {
        let configuration = Configuration::load(
            "/nonexistent/pylon/application.yml",
            vec![
                (DB_URL, "mysql://pylon@localhost/pylon".to_string()),
                (
                    REGISTRY_ENDPOINTS,
                    "http://a:2379, http://b:2379,".to_string(),
                ),
            ],
        )
        .unwrap();

        assert_eq!(
            configuration.persistence_mode().unwrap(),
            StorageMode::ExternalDb
        );
        assert_eq!(
            configuration.registry_endpoints(),
            vec!["http://a:2379".to_string(), "http://b:2379".to_string()]
        );
    }

    #[test]
    fn test_unknown_modes_rejected() {
        let configuration = load_yaml("pylon:\n  registry:\n    mode: zookeeper\n");
        assert!(configuration.registry_mode().is_err());
        assert!("ETCD".parse::<RegistryMode>().is_ok());
    }
}
