//! Configuration management for the kubefleet API
//!
//! Settings are loaded from, in order of priority:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::kubernetes::client::ClientTimeouts;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// HTTP listener
    pub server: ServerConfig,
    /// Management cluster holding the `Cluster` records
    pub registry: RegistryConfig,
    /// Limits for member cluster clients
    pub clusters: ClustersConfig,
    /// Periodic status reconciliation
    pub reconciler: ReconcilerConfig,
    /// Prometheus access
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Kubeconfig of the management cluster; in-cluster or default
    /// kubeconfig inference when unset
    pub kubeconfig: Option<PathBuf>,
    /// Context to use from `kubeconfig`
    pub context: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClustersConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Clusters inspected at once while listing or reconciling
    pub list_concurrency: usize,
}

/// Which clusters a reconciliation tick covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileScope {
    /// Every registered cluster, walked in `page_size` batches
    #[default]
    All,
    /// Only the first `page_size` clusters
    FirstPage,
}

impl std::str::FromStr for ReconcileScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ReconcileScope::All),
            "first_page" => Ok(ReconcileScope::FirstPage),
            other => Err(ConfigError::Validation(format!(
                "unknown reconcile scope '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub page_size: u32,
    pub scope: ReconcileScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// JSON console output
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for ClustersConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            list_concurrency: 8,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            page_size: kubefleet_common::DEFAULT_PAGE_SIZE,
            scope: ReconcileScope::All,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            json: false,
        }
    }
}

impl ClustersConfig {
    pub fn timeouts(&self) -> ClientTimeouts {
        ClientTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MonitoringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl FleetConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("KUBEFLEET_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/kubefleet/config.toml")),
            Some(PathBuf::from("./kubefleet.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `var`
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = var("KUBEFLEET_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("KUBEFLEET_PORT") {
            self.server.port = parse_env("KUBEFLEET_PORT", &port)?;
        }

        if let Some(path) = var("KUBEFLEET_REGISTRY_KUBECONFIG") {
            self.registry.kubeconfig = Some(PathBuf::from(path));
        }

        if let Some(interval) = var("KUBEFLEET_RECONCILE_INTERVAL") {
            self.reconciler.interval_secs = parse_env("KUBEFLEET_RECONCILE_INTERVAL", &interval)?;
        }
        if let Some(size) = var("KUBEFLEET_RECONCILE_PAGE_SIZE") {
            self.reconciler.page_size = parse_env("KUBEFLEET_RECONCILE_PAGE_SIZE", &size)?;
        }
        if let Some(scope) = var("KUBEFLEET_RECONCILE_SCOPE") {
            self.reconciler.scope = scope.parse()?;
        }

        if let Some(level) = var("KUBEFLEET_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = var("KUBEFLEET_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }
        if self.reconciler.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Reconcile interval must be at least one second".to_string(),
            ));
        }
        if self.reconciler.page_size == 0 {
            return Err(ConfigError::Validation(
                "Reconcile page size cannot be 0".to_string(),
            ));
        }

        let timeouts = [
            ("registry.request_timeout_secs", self.registry.request_timeout_secs),
            ("clusters.connect_timeout_secs", self.clusters.connect_timeout_secs),
            ("clusters.request_timeout_secs", self.clusters.request_timeout_secs),
            ("monitoring.request_timeout_secs", self.monitoring.request_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Validation(format!("{} cannot be 0", name)));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{} has invalid value '{}'", key, value)))
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Failed to read configuration file
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    Parse(String),
    /// Configuration validation failed
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => {
                write!(f, "Failed to read config file {:?}: {}", path, err)
            }
            ConfigError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            ConfigError::Validation(err) => write!(f, "Config validation failed: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}
