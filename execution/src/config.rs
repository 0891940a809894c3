use crate::settlement::{RateRange, SettlementPolicy};
use serde::{Deserialize, Serialize};
use staketrade_types::constants::*;
use std::time::Duration;
use thiserror::Error;

/// Simulation settings as read from a config file.
///
/// Every field is optional in the file and falls back to the protocol defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub update_interval_secs: u64,
    pub exit_after_secs: u64,
    pub operation_timeout_secs: u64,
    pub volatility_bps: u32,
    pub natural_profit_probability_bps: u32,
    pub natural_profit: RateRange,
    pub natural_loss: RateRange,
    pub forced_profit: RateRange,
    pub forced_loss: RateRange,
    /// Seeds the random source; random at startup when absent.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let policy = SettlementPolicy::default();
        Self {
            update_interval_secs: UPDATE_INTERVAL_SECS,
            exit_after_secs: EXIT_AFTER_SECS,
            operation_timeout_secs: OPERATION_TIMEOUT_SECS,
            volatility_bps: VOLATILITY_BPS,
            natural_profit_probability_bps: policy.natural_profit_probability_bps,
            natural_profit: policy.natural_profit,
            natural_loss: policy.natural_loss,
            forced_profit: policy.forced_profit,
            forced_loss: policy.forced_loss,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be <= 10000 bps (got {value})")]
    InvalidBps { field: &'static str, value: u32 },
    #[error("{field} is an empty range: {range}")]
    InvalidRange {
        field: &'static str,
        range: RateRange,
    },
}

/// Validated simulation parameters shared by the tracker and the admin surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parameters {
    pub update_interval: Duration,
    pub exit_after: Duration,
    pub operation_timeout: Duration,
    pub volatility_bps: u32,
    pub policy: SettlementPolicy,
    pub rng_seed: Option<u64>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(UPDATE_INTERVAL_SECS),
            exit_after: Duration::from_secs(EXIT_AFTER_SECS),
            operation_timeout: Duration::from_secs(OPERATION_TIMEOUT_SECS),
            volatility_bps: VOLATILITY_BPS,
            policy: SettlementPolicy::default(),
            rng_seed: None,
        }
    }
}

fn non_zero(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(Duration::from_secs(value))
}

fn bps(field: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value > BPS_DENOMINATOR {
        return Err(ConfigError::InvalidBps { field, value });
    }
    Ok(value)
}

fn range(field: &'static str, range: RateRange) -> Result<RateRange, ConfigError> {
    if !range.is_valid() {
        return Err(ConfigError::InvalidRange { field, range });
    }
    Ok(range)
}

impl Config {
    pub fn validate(self) -> Result<Parameters, ConfigError> {
        let update_interval = non_zero("update_interval_secs", self.update_interval_secs)?;
        let exit_after = non_zero("exit_after_secs", self.exit_after_secs)?;
        let operation_timeout = non_zero("operation_timeout_secs", self.operation_timeout_secs)?;
        let volatility_bps = bps("volatility_bps", self.volatility_bps)?;

        let natural_loss = range("natural_loss", self.natural_loss)?;
        bps("natural_loss.max_bps", natural_loss.max_bps)?;
        let forced_loss = range("forced_loss", self.forced_loss)?;
        bps("forced_loss.max_bps", forced_loss.max_bps)?;

        let policy = SettlementPolicy {
            natural_profit_probability_bps: bps(
                "natural_profit_probability_bps",
                self.natural_profit_probability_bps,
            )?,
            natural_profit: range("natural_profit", self.natural_profit)?,
            natural_loss,
            forced_profit: range("forced_profit", self.forced_profit)?,
            forced_loss,
        };

        Ok(Parameters {
            update_interval,
            exit_after,
            operation_timeout,
            volatility_bps,
            policy,
            rng_seed: self.rng_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_to_default_parameters() {
        assert_eq!(Config::default().validate(), Ok(Parameters::default()));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str(
            "update_interval_secs: 5\nforced_profit:\n  min_bps: 1500\n  max_bps: 1800\nrng_seed: 9\n",
        )
        .unwrap();
        let parameters = config.validate().unwrap();
        assert_eq!(parameters.update_interval, Duration::from_secs(5));
        assert_eq!(parameters.exit_after, Duration::from_secs(EXIT_AFTER_SECS));
        assert_eq!(parameters.policy.forced_profit, RateRange::new(1_500, 1_800));
        assert_eq!(parameters.policy.forced_loss, RateRange::new(0, 1_000));
        assert_eq!(parameters.rng_seed, Some(9));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = Config {
            update_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "update_interval_secs",
                value: 0
            })
        );
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = Config {
            natural_profit: RateRange::new(2_000, 500),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange {
                field: "natural_profit",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_loss_beyond_whole_amount() {
        let config = Config {
            forced_loss: RateRange::new(0, 12_000),
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBps {
                field: "forced_loss.max_bps",
                value: 12_000
            })
        );
    }

    #[test]
    fn test_rejects_probability_above_one() {
        let config = Config {
            natural_profit_probability_bps: 10_001,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBps { .. })
        ));
    }
}
