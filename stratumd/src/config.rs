//! Service configuration loaded from YAML.
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use stratum_ddl::DdlConfig;
use stratum_readresolve::ResolverConfig;
use stratum_timestamp::OracleConfig;
use stratum_txn::TxnConfig;
use tracing::Level;

/// Logging destination and verbosity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for rolling JSON logs; stdout when unset.
    pub dir: Option<String>,
    /// Initial level, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { dir: None, level: "info".into() }
    }
}

impl LogConfig {
    /// Parsed [`level`](Self::level).
    pub fn level(&self) -> Result<Level> {
        stratum_log::parse_level(&self.level)
    }
}

/// Credentials guarding the metrics endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

/// Everything `stratumd` reads at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    /// Timestamp server listen address.
    pub listen: String,
    /// Prometheus exporter address; disabled when unset.
    pub metrics_listen: Option<String>,
    /// Optional basic auth for the exporter.
    pub metrics_auth: Option<BasicAuth>,
    /// Timestamp oracle.
    pub oracle: OracleConfig,
    /// Transaction store and keep-alive.
    pub txn: TxnConfig,
    /// Asynchronous read resolution.
    pub resolver: ResolverConfig,
    /// DDL visibility caches.
    pub ddl: DdlConfig,
    /// Logging.
    pub log: LogConfig,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7420".into(),
            metrics_listen: None,
            metrics_auth: None,
            oracle: OracleConfig::default(),
            txn: TxnConfig::default(),
            resolver: ResolverConfig::default(),
            ddl: DdlConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl StratumConfig {
    /// Read and validate the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("load config {}", path.display()))
    }

    /// Parse and validate a YAML document. Missing sections take defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: StratumConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.txn.validate()?;
        if self.oracle.block_size == 0 {
            bail!("oracle.block_size must be positive");
        }
        if self.resolver.threads == 0 || self.resolver.queue_size == 0 {
            bail!("resolver.threads and resolver.queue_size must be positive");
        }
        if self.ddl.cache_size == 0 {
            bail!("ddl.cache_size must be positive");
        }
        self.log.level()?;
        Ok(())
    }

    /// Exporter credentials in the form the metrics server takes.
    pub fn metrics_basic_auth(&self) -> Option<(String, String)> {
        self.metrics_auth.as_ref().map(|a| (a.user.clone(), a.password.clone()))
    }
}
