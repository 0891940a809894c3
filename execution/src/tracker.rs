//! Timer-driven lifecycle of active trades.
//!
//! Each pass re-discovers every active trade on the ledger, adopts the ones it
//! has not seen (starting their countdown), forgets the ones that were settled
//! elsewhere, and then either moves or settles each tracked trade depending on
//! how long it has been tracked.

use crate::{
    config::Parameters,
    discovery::{discover_active_trades, ActiveTrade, Skipped},
    ledger::{with_timeout, Ledger, LedgerError},
    movement::simulate_movement,
    settlement::{Settlement, SettlementMode},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use staketrade_types::{Address, Amount, StakeKey};
use std::collections::{HashMap, HashSet};
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// In-memory record of a trade the tracker is driving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedTrade {
    /// When this process first saw the trade active (not the stake's creation).
    pub started: Instant,
    /// Last value written (or read at adoption).
    pub current_value: Amount,
}

/// What one pass did, by key.
#[derive(Debug, Default)]
pub struct PassReport {
    pub adopted: Vec<StakeKey>,
    pub updated: Vec<(StakeKey, Amount)>,
    pub settled: Vec<(StakeKey, Settlement)>,
    /// Tracked trades that discovery no longer reports as active.
    pub reconciled: Vec<StakeKey>,
    /// Trades whose write lost to a concurrent settlement.
    pub dropped: Vec<StakeKey>,
    /// Writes that failed for another reason; retried next pass.
    pub failed: Vec<(StakeKey, LedgerError)>,
    pub skipped: usize,
}

pub struct Tracker<L: Ledger, R: Rng = StdRng> {
    ledger: L,
    params: Parameters,
    rng: R,
    trades: HashMap<StakeKey, TrackedTrade>,
}

impl<L: Ledger> Tracker<L> {
    /// Creates a tracker seeded from `params.rng_seed`, or from entropy when unset.
    pub fn new(ledger: L, params: Parameters) -> Self {
        let rng = match params.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(ledger, params, rng)
    }
}

impl<L: Ledger, R: Rng> Tracker<L, R> {
    pub fn with_rng(ledger: L, params: Parameters, rng: R) -> Self {
        Self {
            ledger,
            params,
            rng,
            trades: HashMap::new(),
        }
    }

    pub fn tracked(&self) -> &HashMap<StakeKey, TrackedTrade> {
        &self.trades
    }

    pub fn is_tracking(&self, key: &StakeKey) -> bool {
        self.trades.contains_key(key)
    }

    /// Runs one discovery and decision pass as of `now`.
    ///
    /// Fails only when the stakeholder set cannot be read, in which case the
    /// tracked set is left untouched.
    pub async fn tick(&mut self, now: Instant) -> Result<PassReport, LedgerError> {
        let discovery =
            discover_active_trades(&self.ledger, self.params.operation_timeout).await?;
        let mut report = PassReport {
            skipped: discovery.skipped.len(),
            ..PassReport::default()
        };

        // Stakes we could not read this pass keep their state.
        let mut unknown_addresses = HashSet::<Address>::new();
        let mut unknown_keys = HashSet::<StakeKey>::new();
        for skipped in &discovery.skipped {
            match skipped {
                Skipped::Address { address, .. } => {
                    unknown_addresses.insert(*address);
                }
                Skipped::Stake { key, .. } => {
                    unknown_keys.insert(*key);
                }
            }
        }
        let live: HashSet<StakeKey> = discovery.trades.iter().map(|trade| trade.key).collect();
        self.trades.retain(|key, _| {
            let keep = live.contains(key)
                || unknown_keys.contains(key)
                || unknown_addresses.contains(&key.address);
            if !keep {
                debug!(%key, "trade settled elsewhere, no longer tracking");
                report.reconciled.push(*key);
            }
            keep
        });

        for trade in discovery.trades {
            let started = self
                .trades
                .entry(trade.key)
                .or_insert_with(|| {
                    info!(key = %trade.key, value = trade.stake.current_trade_value, "tracking trade");
                    report.adopted.push(trade.key);
                    TrackedTrade {
                        started: now,
                        current_value: trade.stake.current_trade_value,
                    }
                })
                .started;

            if now.saturating_duration_since(started) >= self.params.exit_after {
                self.settle(trade, &mut report).await;
            } else {
                self.update(trade, &mut report).await;
            }
        }

        Ok(report)
    }

    async fn update(&mut self, trade: ActiveTrade, report: &mut PassReport) {
        let key = trade.key;
        let value = simulate_movement(
            &mut self.rng,
            trade.stake.current_trade_value,
            self.params.volatility_bps,
        );
        let result = with_timeout(
            "update_trade_value",
            self.params.operation_timeout,
            self.ledger.update_trade_value(&key, value),
        )
        .await;
        match result {
            Ok(()) => {
                debug!(%key, from = trade.stake.current_trade_value, to = value, "updated trade value");
                if let Some(tracked) = self.trades.get_mut(&key) {
                    tracked.current_value = value;
                }
                report.updated.push((key, value));
            }
            Err(err) => self.write_failed(key, err, report),
        }
    }

    async fn settle(&mut self, trade: ActiveTrade, report: &mut PassReport) {
        let key = trade.key;
        let settlement = self.params.policy.settle(
            &mut self.rng,
            SettlementMode::Natural,
            trade.stake.trading_amount,
            trade.stake.current_trade_value,
        );
        let result = with_timeout(
            "exit_trade",
            self.params.operation_timeout,
            self.ledger.exit_trade(&key, settlement.value),
        )
        .await;
        match result {
            Ok(()) => {
                info!(
                    %key,
                    trading_amount = trade.stake.trading_amount,
                    value = settlement.value,
                    outcome = ?settlement.outcome,
                    "settled trade"
                );
                self.trades.remove(&key);
                report.settled.push((key, settlement));
            }
            Err(err) => self.write_failed(key, err, report),
        }
    }

    fn write_failed(&mut self, key: StakeKey, err: LedgerError, report: &mut PassReport) {
        if err.is_already_settled() {
            info!(%key, "trade already settled, no longer tracking");
            self.trades.remove(&key);
            report.dropped.push(key);
        } else {
            warn!(%key, ?err, "ledger write failed, retrying next pass");
            report.failed.push((key, err));
        }
    }
}

impl<L, R> Tracker<L, R>
where
    L: Ledger + 'static,
    R: Rng + Send + 'static,
{
    /// Runs a pass every `update_interval` until `shutdown` flips to true (or
    /// its sender is dropped). A pass in flight always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = tokio::time::interval(self.params.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval = ?self.params.update_interval,
            exit_after = ?self.params.exit_after,
            "tracker started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                now = interval.tick() => {
                    match self.tick(now).await {
                        Ok(report) => debug!(
                            tracked = self.trades.len(),
                            adopted = report.adopted.len(),
                            updated = report.updated.len(),
                            settled = report.settled.len(),
                            reconciled = report.reconciled.len(),
                            dropped = report.dropped.len(),
                            failed = report.failed.len(),
                            skipped = report.skipped,
                            "pass complete"
                        ),
                        Err(err) => warn!(?err, "discovery failed, retrying next pass"),
                    }
                }
            }
        }

        info!(tracked = self.trades.len(), "tracker stopped");
        self
    }

    /// Spawns [Tracker::run] onto the current runtime.
    pub fn spawn(self) -> TrackerHandle<L, R> {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        TrackerHandle { shutdown, task }
    }
}

/// Stops a spawned tracker.
pub struct TrackerHandle<L: Ledger, R: Rng = StdRng> {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Tracker<L, R>>,
}

impl<L: Ledger, R: Rng> TrackerHandle<L, R> {
    /// Stops scheduling passes and waits for the current one to finish.
    pub async fn stop(self) -> Result<Tracker<L, R>, JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::{address, MockLedger, WriteKind},
        settlement::Outcome,
    };
    use std::{sync::Arc, time::Duration};

    /// Stakes 50_000, giving a trading amount of 1_000.
    const STAKE: Amount = 50_000;

    fn tracker(ledger: &Arc<MockLedger>) -> Tracker<Arc<MockLedger>> {
        let params = Parameters {
            rng_seed: Some(42),
            ..Parameters::default()
        };
        Tracker::new(ledger.clone(), params)
    }

    fn secs(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_new_trade_is_updated_not_exited() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        let report = tracker.tick(t0).await.unwrap();
        assert_eq!(report.adopted, vec![key]);

        let writes = ledger.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].kind, WriteKind::Update);
        assert!((950..=1_050).contains(&writes[0].value));

        let tracked = tracker.tracked()[&key];
        assert_eq!(tracked.started, t0);
        assert_eq!(tracked.current_value, writes[0].value);
        assert_eq!(ledger.snapshot(&key).current_trade_value, writes[0].value);
    }

    #[tokio::test]
    async fn test_trade_exits_after_threshold() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        ledger.clear_writes();

        let report = tracker.tick(t0 + secs(301)).await.unwrap();
        let writes = ledger.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].kind, WriteKind::Exit);
        assert!(writes[0].accepted);
        assert!((900..=1_200).contains(&writes[0].value));
        assert!(!tracker.is_tracking(&key));

        let [(settled, settlement)] = report.settled.as_slice() else {
            panic!("expected one settlement, got {:?}", report.settled);
        };
        assert_eq!(*settled, key);
        assert_eq!(settlement.mode, SettlementMode::Natural);
        match settlement.outcome {
            Outcome::Profit => assert!((1_050..=1_200).contains(&settlement.value)),
            _ => assert!((900..=1_000).contains(&settlement.value)),
        }

        let stake = ledger.snapshot(&key);
        assert!(!stake.trade_active);
        assert_eq!(stake.current_trade_value, settlement.value);

        // Nothing left to do.
        ledger.clear_writes();
        tracker.tick(t0 + secs(331)).await.unwrap();
        assert!(ledger.writes().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        ledger.stake(address(2), STAKE);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        // A second trade adopted later keeps its own countdown.
        ledger.stake(address(3), STAKE);
        let report = tracker.tick(t0 + secs(299)).await.unwrap();
        assert_eq!(report.adopted, vec![StakeKey::new(address(3), 0)]);
        assert_eq!(report.updated.len(), 3);

        let report = tracker.tick(t0 + secs(300)).await.unwrap();
        assert_eq!(report.settled.len(), 2);
        assert_eq!(report.updated.len(), 1);
        assert!(tracker.is_tracking(&StakeKey::new(address(3), 0)));
    }

    #[tokio::test]
    async fn test_external_settlement_is_reconciled_without_write() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        assert!(tracker.is_tracking(&key));

        ledger.settle(&key, 1_000);
        ledger.clear_writes();

        let report = tracker.tick(t0 + secs(30)).await.unwrap();
        assert_eq!(report.reconciled, vec![key]);
        assert!(!tracker.is_tracking(&key));
        assert!(ledger.writes().is_empty());
    }

    #[tokio::test]
    async fn test_lost_exit_race_is_dropped() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        let written = tracker.tracked()[&key].current_value;

        ledger.race_next_write(key);
        let report = tracker.tick(t0 + secs(301)).await.unwrap();
        assert_eq!(report.dropped, vec![key]);
        assert!(report.settled.is_empty());
        assert!(report.failed.is_empty());
        assert!(!tracker.is_tracking(&key));

        // The concurrent settlement stands.
        assert_eq!(ledger.snapshot(&key).current_trade_value, written);
    }

    #[tokio::test]
    async fn test_declined_write_is_retried() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();

        ledger.decline_writes(key);
        let report = tracker.tick(t0 + secs(301)).await.unwrap();
        assert!(matches!(
            report.failed.as_slice(),
            [(failed, LedgerError::WriteFailed { .. })] if *failed == key
        ));
        assert!(tracker.is_tracking(&key));
        assert!(ledger.snapshot(&key).trade_active);

        ledger.allow_writes(&key);
        let report = tracker.tick(t0 + secs(331)).await.unwrap();
        assert_eq!(report.settled.len(), 1);
        assert!(!tracker.is_tracking(&key));

        let exits: Vec<_> = ledger
            .writes()
            .into_iter()
            .filter(|write| write.kind == WriteKind::Exit && write.accepted)
            .collect();
        assert_eq!(exits.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_ledger_keeps_state() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        let before = tracker.tracked()[&key];

        ledger.set_unavailable(true);
        ledger.clear_writes();
        assert!(matches!(
            tracker.tick(t0 + secs(30)).await,
            Err(LedgerError::Unavailable(_))
        ));
        assert_eq!(tracker.tracked()[&key], before);
        assert!(ledger.writes().is_empty());

        ledger.set_unavailable(false);
        tracker.tick(t0 + secs(60)).await.unwrap();
        assert_eq!(ledger.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stake_does_not_block_pass() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        ledger.stake(address(2), STAKE);
        let slow = StakeKey::new(address(1), 0);
        let fast = StakeKey::new(address(2), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        ledger.stall_reads(slow, secs(60));
        ledger.clear_writes();

        let report = tracker.tick(t0 + secs(30)).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.updated[0].0, fast);
        assert!(report.reconciled.is_empty());
        // Unreadable is not the same as settled.
        assert!(tracker.is_tracking(&slow));
        assert_eq!(tracker.tracked()[&slow].started, t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_exit_times_out_and_is_retried() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        let mut tracker = tracker(&ledger);

        let t0 = Instant::now();
        tracker.tick(t0).await.unwrap();
        ledger.stall_writes(key, secs(60));
        ledger.clear_writes();

        let report = tracker.tick(t0 + secs(301)).await.unwrap();
        assert!(report.settled.is_empty());
        assert!(matches!(
            report.failed.as_slice(),
            [(failed, LedgerError::Timeout { operation: "exit_trade", .. })] if *failed == key
        ));
        assert!(tracker.is_tracking(&key));
        assert!(ledger.snapshot(&key).trade_active);
        assert!(ledger.writes().is_empty());

        ledger.resume_writes(&key);
        let report = tracker.tick(t0 + secs(331)).await.unwrap();
        assert_eq!(report.settled.len(), 1);
        assert!(!tracker.is_tracking(&key));
        assert!(!ledger.snapshot(&key).trade_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_update_times_out() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);
        ledger.stall_writes(key, secs(60));
        let mut tracker = tracker(&ledger);

        let report = tracker.tick(Instant::now()).await.unwrap();
        assert_eq!(report.adopted, vec![key]);
        assert!(report.updated.is_empty());
        assert!(matches!(
            report.failed.as_slice(),
            [(_, LedgerError::Timeout { operation: "update_trade_value", .. })]
        ));
        assert_eq!(tracker.tracked()[&key].current_value, 1_000);
        assert_eq!(ledger.snapshot(&key).current_trade_value, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_settles_and_stops() {
        let ledger = Arc::new(MockLedger::new());
        ledger.stake(address(1), STAKE);
        let key = StakeKey::new(address(1), 0);

        let handle = tracker(&ledger).spawn();
        tokio::time::sleep(secs(320)).await;
        let tracker = handle.stop().await.unwrap();

        assert!(tracker.tracked().is_empty());
        assert!(!ledger.snapshot(&key).trade_active);

        let writes = ledger.writes();
        let exits = writes.iter().filter(|w| w.kind == WriteKind::Exit).count();
        let updates = writes.iter().filter(|w| w.kind == WriteKind::Update).count();
        assert_eq!(exits, 1);
        // Passes at 0, 30, ..., 270 update; the pass at 300 exits.
        assert_eq!(updates, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_pass_completes_cleanly() {
        let ledger = Arc::new(MockLedger::new());
        let handle = tracker(&ledger).spawn();
        let tracker = handle.stop().await.unwrap();
        assert!(tracker.tracked().is_empty());
    }
}
