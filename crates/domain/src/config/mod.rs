mod cache;
mod fsm;
mod graph_store;
mod retry;

pub use cache::*;
pub use fsm::*;
pub use graph_store::*;
pub use retry::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fsm: FsmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub graph_store: GraphStoreConfig,
}

impl Config {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Defaults with `BATON_*` environment overrides applied. For callers
    /// that run without a config file.
    pub fn from_env() -> Config {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Overlay `BATON_*` environment variables onto this config.
    /// Unparseable values are ignored in favor of what is already set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("BATON_EFFECTIVENESS_INITIAL") {
            self.fsm.initial_effectiveness = v;
        }
        if let Some(v) = env_parse("BATON_EFFECTIVENESS_MIN") {
            self.fsm.min_effectiveness = v;
        }
        if let Some(v) = env_parse("BATON_EFFECTIVENESS_MAX") {
            self.fsm.max_effectiveness = v;
        }
        if let Some(v) = env_parse("BATON_CACHE_RETENTION_HOURS") {
            self.cache.retention_hours = v;
        }
        if let Some(v) = env_parse("BATON_CACHE_CLEANUP_INTERVAL_SECS") {
            self.cache.cleanup_interval_secs = v;
        }
        if let Some(v) = env_parse("BATON_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env_parse("BATON_RETRY_BACKOFF_MS") {
            self.retry.backoff_base_ms = v;
        }
        if let Some(v) = env_parse("BATON_DRAIN_INTERVAL_SECS") {
            self.retry.drain_interval_secs = v;
        }
        if let Some(v) = env_parse("BATON_EPHEMERAL") {
            self.graph_store.ephemeral = v;
        }
        if let Ok(v) = std::env::var("BATON_GRAPH_URL") {
            if !v.is_empty() {
                self.graph_store.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("BATON_GRAPH_API_KEY") {
            if !v.is_empty() {
                self.graph_store.api_key = Some(v);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.fsm.min_effectiveness >= self.fsm.max_effectiveness {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "fsm.min_effectiveness".into(),
                message: "must be below fsm.max_effectiveness".into(),
            });
        }

        if self.fsm.initial_effectiveness < self.fsm.min_effectiveness
            || self.fsm.initial_effectiveness > self.fsm.max_effectiveness
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "fsm.initial_effectiveness".into(),
                message: "must lie within the configured bounds".into(),
            });
        }

        if self.cache.retention_hours == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cache.retention_hours".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.cache.cleanup_interval_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cache.cleanup_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.retry.max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "retry.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.retry.backoff_base_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "retry.backoff_base_ms".into(),
                message: "zero base retries without backoff".into(),
            });
        }

        if self.retry.drain_interval_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "retry.drain_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if !self.graph_store.ephemeral
            && self.graph_store.transport == GraphTransport::Mcp
            && self.graph_store.base_url.is_empty()
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "graph_store.base_url".into(),
                message: "must not be empty for the mcp transport".into(),
            });
        }

        if self.graph_store.timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "graph_store.timeout_ms".into(),
                message: "zero disables the per-request timeout".into(),
            });
        }

        errors
    }
}
