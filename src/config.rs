use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::assignment::AssignmentPolicy;
use crate::capacity::DEFAULT_HOLD_TTL_SECS;
use crate::service::EngineConfig;

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capacity: CapacitySection,
    pub assignment: AssignmentSection,
    pub catalog: CatalogSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    pub fn load() -> Result<Self> {
        let config_path = env::var("OMBARO_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let mut builder = config::Config::builder();

        if Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(&config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("OMBARO")
                .separator("_")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        let mut config: Self = settings.try_deserialize()?;

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        Ok(config)
    }

    /// Engine tuning derived from the capacity/assignment sections.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            hold_ttl_secs: self.capacity.hold_ttl_secs,
            catalog_cache_ttl_secs: self.catalog.cache_ttl_secs,
            assignment: AssignmentPolicy {
                retry_backoff_secs: self.assignment.retry_backoff_secs,
                cutoff_before_start_secs: self.assignment.cutoff_before_start_secs,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapacitySection {
    /// How long a tentative hold stays valid before expiring.
    pub hold_ttl_secs: u64,
    /// Hold-expiry sweep interval. Zero disables the sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CapacitySection {
    fn default() -> Self {
        Self {
            hold_ttl_secs: DEFAULT_HOLD_TTL_SECS,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssignmentSection {
    pub retry_backoff_secs: u64,
    pub cutoff_before_start_secs: u64,
}

impl Default for AssignmentSection {
    fn default() -> Self {
        let policy = AssignmentPolicy::default();
        Self {
            retry_backoff_secs: policy.retry_backoff_secs,
            cutoff_before_start_secs: policy.cutoff_before_start_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// TTL for read-through catalog/profile caching. Booking and
    /// capacity state are never cached.
    pub cache_ttl_secs: u64,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}
