//! Aggregator and region-store configuration
//!
//! `AggregatorConfig` is read from TOML (every field optional) and then
//! overridden from the environment:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | AGGREGATOR_CONFIG | - | Path to a TOML config file |
//! | AGGREGATOR_TIMEOUT_MS | 2000 | Per-call deadline for region reads |
//! | ENABLE_HLL | true | Read unique-visitor estimates |
//! | REGION_STORE_ADDR | 0.0.0.0:6379 | Listen address of `region-store` |
//! | REGION_NAME | local | Region served by `region-store` |

use crate::region::RegionIdentity;
use crate::store::{StoreKeys, DEFAULT_IDLE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One entry of the fixed region set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub key: String,
    pub name: String,
    pub endpoint: String,
}

impl RegionConfig {
    pub fn new(key: &str, name: &str, endpoint: &str) -> Self {
        RegionConfig {
            key: key.to_string(),
            name: name.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn identity(&self) -> RegionIdentity {
        RegionIdentity::new(self.key.as_str(), self.name.as_str(), self.endpoint.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub regions: Vec<RegionConfig>,
    pub per_call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub enable_uniques: bool,
    pub counter_key: String,
    pub uniques_key: String,
    /// Idle connections kept per region
    pub pool_size: usize,
    /// Pooled connections idle longer than this are reopened
    pub idle_timeout_ms: u64,
    /// Interval of the `watch` loop
    pub poll_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let keys = StoreKeys::default();
        AggregatorConfig {
            regions: vec![
                RegionConfig::new("br", "Brasil", "redis-br:6379"),
                RegionConfig::new("eu", "Europa", "redis-eu:6379"),
                RegionConfig::new("usa", "EUA", "redis-usa:6379"),
            ],
            per_call_timeout_ms: 2000,
            connect_timeout_ms: 2000,
            enable_uniques: true,
            counter_key: keys.counter,
            uniques_key: keys.uniques,
            pool_size: 4,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 5000,
        }
    }
}

impl AggregatorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AggregatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `AGGREGATOR_CONFIG` if set, then variable overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("AGGREGATOR_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGGREGATOR_TIMEOUT_MS` / `ENABLE_HLL` as resolved by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = lookup("AGGREGATOR_TIMEOUT_MS") {
            self.per_call_timeout_ms = timeout.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("AGGREGATOR_TIMEOUT_MS is not a number: {}", timeout))
            })?;
        }
        if let Some(flag) = lookup("ENABLE_HLL") {
            self.enable_uniques = matches!(flag.trim(), "true" | "1");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::Invalid("no regions configured".into()));
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.key.is_empty() {
                return Err(ConfigError::Invalid("region key must not be empty".into()));
            }
            if !seen.insert(region.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate region key '{}'",
                    region.key
                )));
            }
        }
        if self.per_call_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be positive".into()));
        }
        Ok(())
    }

    pub fn store_keys(&self) -> StoreKeys {
        StoreKeys {
            counter: self.counter_key.clone(),
            uniques: self.uniques_key.clone(),
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Settings of the `region-store` binary, environment only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionStoreConfig {
    pub listen_addr: String,
    pub region_name: String,
    pub keys: StoreKeys,
}

impl Default for RegionStoreConfig {
    fn default() -> Self {
        RegionStoreConfig {
            listen_addr: "0.0.0.0:6379".to_string(),
            region_name: "local".to_string(),
            keys: StoreKeys::default(),
        }
    }
}

impl RegionStoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        RegionStoreConfig {
            listen_addr: std::env::var("REGION_STORE_ADDR").unwrap_or(defaults.listen_addr),
            region_name: std::env::var("REGION_NAME").unwrap_or(defaults.region_name),
            keys: StoreKeys {
                counter: std::env::var("COUNTER_KEY").unwrap_or(defaults.keys.counter),
                uniques: std::env::var("UNIQUES_KEY").unwrap_or(defaults.keys.uniques),
            },
        }
    }
}
