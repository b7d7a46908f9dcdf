use crate::application::retry::RetryPolicy;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Backoff settings for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Engine settings, loaded from an optional JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    /// Per-call timeout applied to every remote request.
    pub call_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    /// Whether fallback grants unlock content before the remote system confirms them.
    pub unlock_on_fallback: bool,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            call_timeout_ms: 5_000,
            cache_ttl_secs: 300,
            unlock_on_fallback: true,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads the config file if one is given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw).map_err(|e| {
                    EngineError::ConfigError(format!("{}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.retry.max_attempts) {
            return Err(EngineError::ConfigError(format!(
                "retry.max_attempts must be between 1 and 5, got {}",
                self.retry.max_attempts
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(EngineError::ConfigError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "call_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
