//! Enumeration of stakes with a running trade.

use crate::ledger::{with_timeout, Ledger, LedgerError};
use staketrade_types::{Address, Stake, StakeKey};
use std::time::Duration;
use tracing::{debug, warn};

/// A stake whose trade is still running, as read during one discovery pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveTrade {
    pub key: StakeKey,
    pub stake: Stake,
}

/// A stake (or whole address) that could not be read during a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Skipped {
    Address { address: Address, error: LedgerError },
    Stake { key: StakeKey, error: LedgerError },
}

/// Result of one discovery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Active trades in stakeholder (event log) order, then ascending index.
    pub trades: Vec<ActiveTrade>,
    pub skipped: Vec<Skipped>,
}

/// Reads every stake of every stakeholder and keeps those with a running trade.
///
/// Only a failure to enumerate stakeholders aborts the pass (as
/// [LedgerError::Unavailable]); unreadable stakes are logged and skipped.
pub async fn discover_active_trades<L: Ledger>(
    ledger: &L,
    timeout: Duration,
) -> Result<Discovery, LedgerError> {
    let stakeholders = match with_timeout("stakeholders", timeout, ledger.stakeholders()).await {
        Ok(stakeholders) => stakeholders,
        Err(LedgerError::Unavailable(reason)) => return Err(LedgerError::Unavailable(reason)),
        Err(err) => return Err(LedgerError::Unavailable(err.to_string())),
    };

    let mut discovery = Discovery::default();
    for address in stakeholders {
        let count = match with_timeout("stake_count", timeout, ledger.stake_count(&address)).await
        {
            Ok(count) => count,
            Err(error) => {
                warn!(%address, ?error, "failed to read stake count");
                discovery.skipped.push(Skipped::Address { address, error });
                continue;
            }
        };

        for index in 0..count {
            let key = StakeKey::new(address, index);
            match with_timeout(
                "stake_details",
                timeout,
                ledger.stake_details(&address, index),
            )
            .await
            {
                Ok(stake) if stake.is_trading() => {
                    discovery.trades.push(ActiveTrade { key, stake });
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%key, ?error, "failed to read stake");
                    discovery.skipped.push(Skipped::Stake { key, error });
                }
            }
        }
    }
    debug!(
        trades = discovery.trades.len(),
        skipped = discovery.skipped.len(),
        "discovery complete"
    );

    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{address, MockLedger};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_orders_by_stakeholder_then_index() {
        let ledger = MockLedger::new();
        ledger.stake(address(2), 1_000);
        ledger.stake(address(1), 1_000);
        ledger.stake(address(2), 2_000);
        ledger.stake(address(1), 3_000);

        let discovery = discover_active_trades(&ledger, TIMEOUT).await.unwrap();
        let keys: Vec<_> = discovery.trades.iter().map(|t| t.key).collect();
        assert_eq!(
            keys,
            vec![
                StakeKey::new(address(2), 0),
                StakeKey::new(address(2), 1),
                StakeKey::new(address(1), 0),
                StakeKey::new(address(1), 1),
            ]
        );
        assert!(discovery.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_excludes_settled_and_withdrawn() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let ledger = MockLedger::new();
            let mut expected = Vec::new();
            for owner in 0..4u8 {
                for index in 0..rng.gen_range(0..5u64) {
                    ledger.stake(address(owner), rng.gen_range(1..1_000_000));
                    let key = StakeKey::new(address(owner), index);
                    match rng.gen_range(0..3) {
                        0 => expected.push(key),
                        1 => ledger.settle(&key, 10),
                        _ => ledger.withdraw(&key, 10),
                    }
                }
            }

            let discovery = discover_active_trades(&ledger, TIMEOUT).await.unwrap();
            let keys: Vec<_> = discovery.trades.iter().map(|t| t.key).collect();
            assert_eq!(keys, expected);
            assert!(discovery.trades.iter().all(|t| t.stake.is_trading()));
        }
    }

    #[tokio::test]
    async fn test_unreadable_stake_is_skipped() {
        let ledger = MockLedger::new();
        ledger.stake(address(1), 1_000);
        ledger.stake(address(1), 1_000);
        let broken = StakeKey::new(address(1), 0);
        ledger.fail_reads(broken);

        let discovery = discover_active_trades(&ledger, TIMEOUT).await.unwrap();
        assert_eq!(discovery.trades.len(), 1);
        assert_eq!(discovery.trades[0].key, StakeKey::new(address(1), 1));
        assert!(matches!(
            discovery.skipped.as_slice(),
            [Skipped::Stake { key, .. }] if *key == broken
        ));
    }

    #[tokio::test]
    async fn test_stakeholder_failure_aborts_pass() {
        let ledger = MockLedger::new();
        ledger.stake(address(1), 1_000);
        ledger.set_unavailable(true);
        assert!(matches!(
            discover_active_trades(&ledger, TIMEOUT).await,
            Err(LedgerError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_read_times_out_and_is_skipped() {
        let ledger = MockLedger::new();
        ledger.stake(address(1), 1_000);
        ledger.stake(address(2), 1_000);
        let slow = StakeKey::new(address(1), 0);
        ledger.stall_reads(slow, Duration::from_secs(60));

        let discovery = discover_active_trades(&ledger, TIMEOUT).await.unwrap();
        assert_eq!(discovery.trades.len(), 1);
        assert!(matches!(
            discovery.skipped.as_slice(),
            [Skipped::Stake { key, error: LedgerError::Timeout { .. } }] if *key == slow
        ));
    }
}
