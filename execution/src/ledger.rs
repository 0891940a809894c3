//! Call contract of the external staking ledger.
//!
//! The ledger is the single source of truth for stake state. Everything in this
//! crate reads and writes it exclusively through [Ledger], which keeps the
//! engine independent of how the ledger is reached (in-process, over HTTP, ...).

use staketrade_types::{Address, Amount, Stake, StakeKey};
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;

/// Why the ledger refused (or never confirmed) a write.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WriteFailure {
    #[error("trade already settled")]
    AlreadySettled,
    #[error("stake is no longer active")]
    StakeInactive,
    #[error("write declined: {0}")]
    Declined(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("stake {index} not found for {address}")]
    StakeNotFound { address: Address, index: u64 },
    #[error("ledger write failed for {key}: {cause}")]
    WriteFailed { key: StakeKey, cause: WriteFailure },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl LedgerError {
    /// True when the write lost a race against another settlement of the same
    /// trade (or the stake was withdrawn), so there is nothing left to track.
    pub fn is_already_settled(&self) -> bool {
        matches!(
            self,
            LedgerError::WriteFailed {
                cause: WriteFailure::AlreadySettled | WriteFailure::StakeInactive,
                ..
            }
        )
    }
}

/// Read/write access to the staking ledger.
///
/// Implementations hold no engine state. Writes are mutating calls that may be
/// rejected; callers must not assume success without an `Ok`.
pub trait Ledger: Send + Sync {
    /// Every address that ever staked, in event log order without duplicates.
    fn stakeholders(&self) -> impl Future<Output = Result<Vec<Address>, LedgerError>> + Send;

    fn stake_count(&self, address: &Address)
        -> impl Future<Output = Result<u64, LedgerError>> + Send;

    fn stake_details(
        &self,
        address: &Address,
        index: u64,
    ) -> impl Future<Output = Result<Stake, LedgerError>> + Send;

    fn update_trade_value(
        &self,
        key: &StakeKey,
        value: Amount,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Settles the trade at `value`. A second exit of the same trade is rejected
    /// with [WriteFailure::AlreadySettled].
    fn exit_trade(
        &self,
        key: &StakeKey,
        value: Amount,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

impl<L: Ledger> Ledger for Arc<L> {
    fn stakeholders(&self) -> impl Future<Output = Result<Vec<Address>, LedgerError>> + Send {
        self.as_ref().stakeholders()
    }

    fn stake_count(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send {
        self.as_ref().stake_count(address)
    }

    fn stake_details(
        &self,
        address: &Address,
        index: u64,
    ) -> impl Future<Output = Result<Stake, LedgerError>> + Send {
        self.as_ref().stake_details(address, index)
    }

    fn update_trade_value(
        &self,
        key: &StakeKey,
        value: Amount,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send {
        self.as_ref().update_trade_value(key, value)
    }

    fn exit_trade(
        &self,
        key: &StakeKey,
        value: Amount,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send {
        self.as_ref().exit_trade(key, value)
    }
}

/// Bounds a ledger call, turning an elapsed deadline into [LedgerError::Timeout].
pub async fn with_timeout<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout { operation, timeout }),
    }
}
