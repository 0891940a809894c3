use crate::RetryPolicy;
use serde::{Deserialize, Serialize};
use staketrade_execution::{Config, ConfigError as SimulationConfigError, Parameters};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Also retry ledger writes, not only reads.
    pub retry_writes: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            retry_writes: false,
        }
    }
}

/// Configuration for the standalone tracker binary.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub url: String,
    pub log_level: String,
    pub retry: RetryConfig,
    pub simulation: Config,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            log_level: "info".to_string(),
            retry: RetryConfig::default(),
            simulation: Config::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("invalid simulation settings: {0}")]
    Simulation(#[from] SimulationConfigError),
}

pub struct ValidatedTrackerConfig {
    pub url: String,
    pub log_level: Level,
    pub retry_policy: RetryPolicy,
    pub params: Parameters,
}

impl TrackerConfig {
    pub fn validate(self) -> Result<ValidatedTrackerConfig, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "retry.max_attempts",
                value: 0,
            });
        }
        let params = self.simulation.validate()?;

        Ok(ValidatedTrackerConfig {
            url: self.url,
            log_level,
            retry_policy: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
                retry_non_idempotent: self.retry.retry_writes,
            },
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config() {
        let yaml = r#"
url: http://ledger.local:9000
log_level: warn
retry:
  max_attempts: 5
  retry_writes: true
simulation:
  update_interval_secs: 15
"#;
        let config: TrackerConfig = serde_yaml::from_str(yaml).unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(validated.url, "http://ledger.local:9000");
        assert_eq!(validated.log_level, Level::WARN);
        assert_eq!(validated.retry_policy.max_attempts, 5);
        assert_eq!(validated.retry_policy.initial_backoff, Duration::from_millis(200));
        assert!(validated.retry_policy.retry_non_idempotent);
        assert_eq!(validated.params.update_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = TrackerConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(
            config.validate().err(),
            Some(ConfigError::InvalidNonZero {
                field: "retry.max_attempts",
                value: 0
            })
        );
    }
}
