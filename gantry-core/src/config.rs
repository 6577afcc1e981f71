//! Configuration management.

use crate::error::{GantryError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persistent configuration for Gantry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whole-deployment ceiling in minutes.
    pub deployment_timeout_minutes: u64,

    /// Health-wait ceiling per service in seconds.
    pub health_timeout_seconds: u64,

    /// Graceful stop window before the engine kills a container, seconds.
    pub stop_timeout_seconds: u64,

    /// Agent command attempts (first try included).
    pub agent_retry_attempts: u32,

    /// Delay between agent command attempts, seconds.
    pub agent_retry_delay_seconds: u64,

    /// Per-attempt agent response timeout, seconds.
    pub agent_command_timeout_seconds: u64,

    /// Default rollback policy for new deployments.
    pub rollback_on_failure: bool,

    pub log_level: String,
    pub data_dir: String,
    pub db_path: String,
    pub stacks_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment_timeout_minutes: 30,
            health_timeout_seconds: 120,
            stop_timeout_seconds: 10,
            agent_retry_attempts: 3,
            agent_retry_delay_seconds: 2,
            agent_command_timeout_seconds: 30,
            rollback_on_failure: true,
            log_level: "info".to_string(),
            data_dir: paths::data_dir().to_string_lossy().to_string(),
            db_path: paths::db_path().to_string_lossy().to_string(),
            stacks_dir: paths::stacks_dir().to_string_lossy().to_string(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from disk, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| GantryError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| GantryError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GantryError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            GantryError::InvalidConfig { reason: format!("Failed to serialize config: {}", e) }
        })?;
        std::fs::write(&path, content).map_err(|e| GantryError::IoError { path, source: e })
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.deployment_timeout_minutes * 60)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    /// Retry policy for agent commands derived from this config.
    pub fn agent_retry_policy(&self) -> crate::agent::RetryPolicy {
        crate::agent::RetryPolicy {
            attempts: self.agent_retry_attempts,
            delay: Duration::from_secs(self.agent_retry_delay_seconds),
            timeout: Duration::from_secs(self.agent_command_timeout_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.deployment_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.agent_retry_policy().attempts, 3);
        assert!(config.rollback_on_failure);
    }
}
