//! Operator control over active trades.
//!
//! Every operation reads the ledger afresh: nothing is shared with the
//! [Tracker](crate::Tracker), so an operator and the timer can race on the
//! same trade. The ledger rejects the loser's write.

use crate::{
    config::Parameters,
    discovery::discover_active_trades,
    ledger::{with_timeout, Ledger, LedgerError},
    movement::simulate_movement,
    settlement::{Settlement, SettlementMode},
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use staketrade_types::{amount::change_bps, Amount, Stake, StakeKey};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

pub use staketrade_types::api::BulkOutcome;

/// Operator exit flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMode {
    Current,
    Profit,
    Loss,
}

impl From<ExitMode> for SettlementMode {
    fn from(mode: ExitMode) -> Self {
        match mode {
            ExitMode::Current => SettlementMode::AtCurrent,
            ExitMode::Profit => SettlementMode::ForcedProfit,
            ExitMode::Loss => SettlementMode::ForcedLoss,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdminError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("stake {0} has no active trade")]
    NotActive(StakeKey),
}

/// An active trade with its profit or loss against the trading amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeView {
    #[serde(flatten)]
    pub key: StakeKey,
    pub stake: Stake,
    pub pnl_bps: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkFailure {
    pub key: StakeKey,
    pub error: AdminError,
}

/// Per-trade results of a bulk operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkReport<T> {
    pub succeeded: Vec<(StakeKey, T)>,
    pub failed: Vec<BulkFailure>,
}

impl<T> Default for BulkReport<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BulkReport<T> {
    /// Zero trades counts as success.
    pub fn outcome(&self) -> BulkOutcome {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (_, true) => BulkOutcome::Succeeded,
            (true, false) => BulkOutcome::Failed,
            (false, false) => BulkOutcome::Partial,
        }
    }

    fn record(&mut self, key: StakeKey, result: Result<T, AdminError>) {
        match result {
            Ok(value) => self.succeeded.push((key, value)),
            Err(error) => {
                warn!(%key, ?error, "bulk operation failed for trade");
                self.failed.push(BulkFailure { key, error });
            }
        }
    }
}

pub struct Admin<L: Ledger> {
    ledger: L,
    params: Parameters,
    rng: Mutex<StdRng>,
}

impl<L: Ledger> Admin<L> {
    pub fn new(ledger: L, params: Parameters) -> Self {
        let rng = match params.rng_seed {
            // Offset so a shared seed does not mirror the tracker's draws.
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            ledger,
            params,
            rng: Mutex::new(rng),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every currently active trade, in discovery order.
    pub async fn active_trades(&self) -> Result<Vec<TradeView>, LedgerError> {
        let discovery = discover_active_trades(&self.ledger, self.params.operation_timeout).await?;
        Ok(discovery
            .trades
            .into_iter()
            .map(|trade| TradeView {
                key: trade.key,
                pnl_bps: change_bps(trade.stake.trading_amount, trade.stake.current_trade_value),
                stake: trade.stake,
            })
            .collect())
    }

    /// Applies one random movement to a single trade.
    pub async fn update_one(&self, key: &StakeKey) -> Result<Amount, AdminError> {
        let stake = self.read(key).await?;
        self.update(key, &stake).await
    }

    /// Settles a single trade.
    pub async fn exit_one(&self, key: &StakeKey, mode: ExitMode) -> Result<Settlement, AdminError> {
        let stake = self.read(key).await?;
        self.exit(key, &stake, mode).await
    }

    /// Moves every trade from one discovery pass; failures do not stop the rest.
    pub async fn update_all(&self) -> Result<BulkReport<Amount>, LedgerError> {
        let discovery = discover_active_trades(&self.ledger, self.params.operation_timeout).await?;
        let mut report = BulkReport::default();
        for trade in discovery.trades {
            let result = self.update(&trade.key, &trade.stake).await;
            report.record(trade.key, result);
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "updated all trades"
        );
        Ok(report)
    }

    /// Settles every trade from one discovery pass; failures do not stop the rest.
    pub async fn exit_all(&self, mode: ExitMode) -> Result<BulkReport<Settlement>, LedgerError> {
        let discovery = discover_active_trades(&self.ledger, self.params.operation_timeout).await?;
        let mut report = BulkReport::default();
        for trade in discovery.trades {
            let result = self.exit(&trade.key, &trade.stake, mode).await;
            report.record(trade.key, result);
        }
        info!(
            ?mode,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "exited all trades"
        );
        Ok(report)
    }

    async fn read(&self, key: &StakeKey) -> Result<Stake, AdminError> {
        let stake = with_timeout(
            "stake_details",
            self.params.operation_timeout,
            self.ledger.stake_details(&key.address, key.index),
        )
        .await?;
        if !stake.is_trading() {
            return Err(AdminError::NotActive(*key));
        }
        Ok(stake)
    }

    async fn update(&self, key: &StakeKey, stake: &Stake) -> Result<Amount, AdminError> {
        let value = simulate_movement(
            &mut *self.rng(),
            stake.current_trade_value,
            self.params.volatility_bps,
        );
        with_timeout(
            "update_trade_value",
            self.params.operation_timeout,
            self.ledger.update_trade_value(key, value),
        )
        .await?;
        info!(%key, from = stake.current_trade_value, to = value, "operator updated trade value");
        Ok(value)
    }

    async fn exit(
        &self,
        key: &StakeKey,
        stake: &Stake,
        mode: ExitMode,
    ) -> Result<Settlement, AdminError> {
        let settlement = self.params.policy.settle(
            &mut *self.rng(),
            mode.into(),
            stake.trading_amount,
            stake.current_trade_value,
        );
        with_timeout(
            "exit_trade",
            self.params.operation_timeout,
            self.ledger.exit_trade(key, settlement.value),
        )
        .await?;
        info!(
            %key,
            ?mode,
            value = settlement.value,
            outcome = ?settlement.outcome,
            "operator settled trade"
        );
        Ok(settlement)
    }
}
