//! In-process staking ledger.
//!
//! Holds stakes and the `Staked` event log behind a lock and enforces the same
//! rules as the on-chain contract: trades settle once, withdrawn stakes are
//! immutable, and withdrawal waits for settlement and the lock period.

use crate::ledger::{Ledger, LedgerError, WriteFailure};
use staketrade_types::{
    constants::TRADING_ALLOCATION_BPS, portion, unique_stakers, Address, Amount, Stake,
    StakeKey, StakedEvent,
};
use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StakeError {
    #[error("cannot stake a zero amount")]
    ZeroAmount,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnstakeError {
    #[error("stake {0} not found")]
    NotFound(StakeKey),
    #[error("stake {key} locked for another {remaining}s")]
    Locked { key: StakeKey, remaining: u64 },
    #[error("stake {0} still has an active trade")]
    TradeActive(StakeKey),
    #[error("stake {0} already withdrawn")]
    Withdrawn(StakeKey),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default)]
struct Inner {
    stakes: HashMap<Address, Vec<Stake>>,
    events: Vec<StakedEvent>,
}

#[derive(Default)]
pub struct Memory {
    inner: RwLock<Inner>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, LedgerError> {
        self.inner.read().map_err(|e| {
            error!("Failed to acquire read lock on ledger: {}", e);
            LedgerError::Unavailable("ledger lock poisoned".to_string())
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, LedgerError> {
        self.inner.write().map_err(|e| {
            error!("Failed to acquire write lock on ledger: {}", e);
            LedgerError::Unavailable("ledger lock poisoned".to_string())
        })
    }

    /// Locks `amount` for `owner`, allocating a share of it to a new trade.
    ///
    /// Returns the index of the new stake.
    pub fn stake(&self, owner: Address, amount: Amount, now: u64) -> Result<u64, StakeError> {
        if amount == 0 {
            return Err(StakeError::ZeroAmount);
        }
        let mut inner = self
            .write()
            .map_err(|e| StakeError::Unavailable(e.to_string()))?;

        let trading_amount = portion(amount, TRADING_ALLOCATION_BPS);
        let stakes = inner.stakes.entry(owner).or_default();
        stakes.push(Stake {
            amount,
            timestamp: now,
            trading_amount,
            current_trade_value: trading_amount,
            trade_active: true,
            claimable_rewards: 0,
            active: true,
        });
        let index = (stakes.len() - 1) as u64;
        inner.events.push(StakedEvent {
            user: owner,
            amount,
            trading_amount,
            timestamp: now,
        });
        debug!(%owner, index, amount, trading_amount, "staked");

        Ok(index)
    }

    /// Withdraws a settled, unlocked stake and returns the staked amount.
    pub fn unstake(&self, key: &StakeKey, now: u64) -> Result<Amount, UnstakeError> {
        let mut inner = self
            .write()
            .map_err(|e| UnstakeError::Unavailable(e.to_string()))?;
        let stake = inner
            .stakes
            .get_mut(&key.address)
            .and_then(|stakes| stakes.get_mut(key.index as usize))
            .ok_or(UnstakeError::NotFound(*key))?;

        if !stake.active {
            return Err(UnstakeError::Withdrawn(*key));
        }
        if stake.trade_active {
            return Err(UnstakeError::TradeActive(*key));
        }
        let remaining = stake.seconds_until_unlock(now);
        if remaining > 0 {
            return Err(UnstakeError::Locked {
                key: *key,
                remaining,
            });
        }

        stake.active = false;
        debug!(%key, amount = stake.amount, "unstaked");
        Ok(stake.amount)
    }

    pub fn can_unstake(&self, key: &StakeKey, now: u64) -> Result<bool, LedgerError> {
        Ok(self.get(key)?.can_unstake(now))
    }

    /// The raw `Staked` event log, oldest first.
    pub fn events(&self) -> Result<Vec<StakedEvent>, LedgerError> {
        Ok(self.read()?.events.clone())
    }

    /// Current snapshot of one stake.
    pub fn get(&self, key: &StakeKey) -> Result<Stake, LedgerError> {
        let inner = self.read()?;
        lookup(&inner, &key.address, key.index).cloned()
    }

    pub fn set_trade_value(&self, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        self.mutate(key, |stake| stake.current_trade_value = value)
    }

    /// Closes the trade at `value`; rejected if it was already settled.
    pub fn settle(&self, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        self.mutate(key, |stake| {
            stake.current_trade_value = value;
            stake.trade_active = false;
        })
    }

    fn mutate(&self, key: &StakeKey, apply: impl FnOnce(&mut Stake)) -> Result<(), LedgerError> {
        let mut inner = self.write()?;
        let stake = inner
            .stakes
            .get_mut(&key.address)
            .and_then(|stakes| stakes.get_mut(key.index as usize))
            .ok_or(LedgerError::StakeNotFound {
                address: key.address,
                index: key.index,
            })?;

        let cause = if !stake.active {
            WriteFailure::StakeInactive
        } else if !stake.trade_active {
            WriteFailure::AlreadySettled
        } else {
            apply(stake);
            return Ok(());
        };
        Err(LedgerError::WriteFailed { key: *key, cause })
    }
}

fn lookup<'a>(inner: &'a Inner, address: &Address, index: u64) -> Result<&'a Stake, LedgerError> {
    inner
        .stakes
        .get(address)
        .and_then(|stakes| stakes.get(index as usize))
        .ok_or(LedgerError::StakeNotFound {
            address: *address,
            index,
        })
}

impl Ledger for Memory {
    async fn stakeholders(&self) -> Result<Vec<Address>, LedgerError> {
        let inner = self.read()?;
        Ok(unique_stakers(&inner.events))
    }

    async fn stake_count(&self, address: &Address) -> Result<u64, LedgerError> {
        let inner = self.read()?;
        Ok(inner.stakes.get(address).map_or(0, |stakes| stakes.len() as u64))
    }

    async fn stake_details(&self, address: &Address, index: u64) -> Result<Stake, LedgerError> {
        self.get(&StakeKey::new(*address, index))
    }

    async fn update_trade_value(&self, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        self.set_trade_value(key, value)
    }

    async fn exit_trade(&self, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        self.settle(key, value)
    }
}
