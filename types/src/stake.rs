use crate::{
    amount::{serde_amount, Amount},
    constants::LOCK_PERIOD_SECS,
    Address,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Snapshot of one stake as reported by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    #[serde(with = "serde_amount")]
    pub amount: Amount,
    /// Creation time in seconds since the epoch.
    pub timestamp: u64,
    #[serde(with = "serde_amount")]
    pub trading_amount: Amount,
    /// Only meaningful while `trade_active` is true, or as the settled value after.
    #[serde(with = "serde_amount")]
    pub current_trade_value: Amount,
    pub trade_active: bool,
    #[serde(with = "serde_amount")]
    pub claimable_rewards: Amount,
    /// False once withdrawn; the stake is immutable from then on.
    pub active: bool,
}

impl Stake {
    /// True while the simulated trade is still running on a live stake.
    pub fn is_trading(&self) -> bool {
        self.active && self.trade_active
    }

    pub fn unlocks_at(&self) -> u64 {
        self.timestamp.saturating_add(LOCK_PERIOD_SECS)
    }

    pub fn seconds_until_unlock(&self, now: u64) -> u64 {
        self.unlocks_at().saturating_sub(now)
    }

    /// Whether the ledger would accept a withdrawal at `now`.
    pub fn can_unstake(&self, now: u64) -> bool {
        self.active && !self.trade_active && now >= self.unlocks_at()
    }
}

/// Entry of the ledger's historical `Staked` event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedEvent {
    pub user: Address,
    #[serde(with = "serde_amount")]
    pub amount: Amount,
    #[serde(with = "serde_amount")]
    pub trading_amount: Amount,
    pub timestamp: u64,
}

/// Distinct stakers in first-seen (event log) order.
pub fn unique_stakers<'a>(events: impl IntoIterator<Item = &'a StakedEvent>) -> Vec<Address> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(event.user))
        .map(|event| event.user)
        .collect()
}
