//! Serializable service configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stockhist_core::data::yahoo::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT, MAX_RETRIES};
use stockhist_core::data::{CircuitBreaker, ProviderError, YahooProvider, YahooSettings};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to build provider: {0}")]
    Provider(#[from] ProviderError),
}

/// Top-level configuration for a [`crate::HistoryResolver`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// SQLite database holding full-history snapshots.
    pub db_path: PathBuf,

    /// Remote provider settings.
    pub provider: ProviderConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("stocks.db"),
            provider: ProviderConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Yahoo Finance HTTP, retry and circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Clamped to [`MAX_RETRIES`] when the provider is built.
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub base_delay_ms: u64,
    pub cooldown_secs: u64,
    pub failure_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            cooldown_secs: 30 * 60,
            failure_threshold: 3,
        }
    }
}

impl ProviderConfig {
    pub fn yahoo_settings(&self) -> YahooSettings {
        YahooSettings {
            base_url: self.base_url.clone(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries.min(MAX_RETRIES),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            Duration::from_secs(self.cooldown_secs),
            self.failure_threshold,
        ))
    }

    /// Yahoo provider with a fresh circuit breaker.
    pub fn build_provider(&self) -> Result<YahooProvider, ConfigError> {
        Ok(YahooProvider::new(
            self.yahoo_settings(),
            self.circuit_breaker(),
        )?)
    }
}
