use serde::{Deserialize, Serialize};
use staketrade_execution::{Config, ConfigError as SimulationConfigError, Parameters};
use staketrade_types::{constants::DECIMALS, parse_amount, Address, Amount, AmountError};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

/// Request rate allowed per client IP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimit {
    /// One request is replenished every this many milliseconds.
    pub replenish_interval_ms: u64,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            replenish_interval_ms: 1,
            burst: 10_000,
        }
    }
}

/// A stake created at startup. `amount` is in whole tokens (e.g. `"2500.5"`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GenesisStake {
    pub owner: Address,
    pub amount: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Configuration for the simulator binary.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub port: u16,
    pub log_level: String,
    /// Runs the trade lifecycle tracker inside the simulator process.
    pub run_tracker: bool,
    pub rate_limit: RateLimit,
    pub simulation: Config,
    pub genesis: Vec<GenesisStake>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            run_tracker: true,
            rate_limit: RateLimit::default(),
            simulation: Config::default(),
            genesis: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("invalid simulation settings: {0}")]
    Simulation(#[from] SimulationConfigError),
    #[error("genesis stake {index} has an invalid amount {value:?}: {source}")]
    InvalidGenesisAmount {
        index: usize,
        value: String,
        #[source]
        source: AmountError,
    },
}

pub struct ValidatedConfig {
    pub port: u16,
    pub log_level: Level,
    pub run_tracker: bool,
    pub rate_limit: RateLimit,
    pub params: Parameters,
    /// Owner, base-unit amount and optional timestamp of each genesis stake.
    pub genesis: Vec<(Address, Amount, Option<u64>)>,
}

impl SimulatorConfig {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        let params = self.simulation.validate()?;
        let genesis = self
            .genesis
            .into_iter()
            .enumerate()
            .map(|(index, stake)| {
                let amount = parse_amount(&stake.amount, DECIMALS).map_err(|source| {
                    ConfigError::InvalidGenesisAmount {
                        index,
                        value: stake.amount.clone(),
                        source,
                    }
                })?;
                Ok((stake.owner, amount, stake.timestamp))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(ValidatedConfig {
            port: self.port,
            log_level,
            run_tracker: self.run_tracker,
            rate_limit: self.rate_limit,
            params,
            genesis,
        })
    }
}
