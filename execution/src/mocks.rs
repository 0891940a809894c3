//! Test helpers: a fault-injecting ledger that records every write.

use crate::{
    ledger::{Ledger, LedgerError, WriteFailure},
    memory::Memory,
};
use staketrade_types::{
    constants::LOCK_PERIOD_SECS, Address, Amount, Stake, StakeKey, ADDRESS_LENGTH,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

/// Creation time of every stake made through [MockLedger::stake].
pub const GENESIS: u64 = 1_700_000_000;

/// Deterministic address derived from a single byte.
pub fn address(byte: u8) -> Address {
    Address::new([byte; ADDRESS_LENGTH])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Update,
    Exit,
}

/// One write attempt and whether the ledger accepted it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteCall {
    pub kind: WriteKind,
    pub key: StakeKey,
    pub value: Amount,
    pub accepted: bool,
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    failing_reads: HashSet<StakeKey>,
    stalled_reads: HashMap<StakeKey, Duration>,
    declined_writes: HashSet<StakeKey>,
    stalled_writes: HashMap<StakeKey, Duration>,
    raced_writes: HashSet<StakeKey>,
    writes: Vec<WriteCall>,
}

/// [Memory] ledger wrapped with switchable failures.
#[derive(Default)]
pub struct MockLedger {
    memory: Memory,
    faults: Mutex<Faults>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn stake(&self, owner: Address, amount: Amount) -> u64 {
        self.memory
            .stake(owner, amount, GENESIS)
            .expect("stake should succeed")
    }

    /// Settles a trade directly on the ledger, bypassing the write journal.
    pub fn settle(&self, key: &StakeKey, value: Amount) {
        self.memory.settle(key, value).expect("settle should succeed");
    }

    /// Settles and withdraws a stake.
    pub fn withdraw(&self, key: &StakeKey, value: Amount) {
        self.settle(key, value);
        self.memory
            .unstake(key, GENESIS + LOCK_PERIOD_SECS)
            .expect("unstake should succeed");
    }

    pub fn snapshot(&self, key: &StakeKey) -> Stake {
        self.memory.get(key).expect("stake should exist")
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    pub fn fail_reads(&self, key: StakeKey) {
        self.faults().failing_reads.insert(key);
    }

    pub fn stall_reads(&self, key: StakeKey, delay: Duration) {
        self.faults().stalled_reads.insert(key, delay);
    }

    /// Makes writes to `key` fail as if the signer declined them.
    pub fn decline_writes(&self, key: StakeKey) {
        self.faults().declined_writes.insert(key);
    }

    /// Settles `key` at its current value just before the next write to it
    /// lands, as a concurrent operator would.
    pub fn race_next_write(&self, key: StakeKey) {
        self.faults().raced_writes.insert(key);
    }

    pub fn allow_writes(&self, key: &StakeKey) {
        self.faults().declined_writes.remove(key);
    }

    /// Delays every write to `key` by `delay` before it reaches the ledger.
    pub fn stall_writes(&self, key: StakeKey, delay: Duration) {
        self.faults().stalled_writes.insert(key, delay);
    }

    pub fn resume_writes(&self, key: &StakeKey) {
        self.faults().stalled_writes.remove(key);
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.faults().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.faults().writes.clear();
    }

    async fn stall_write(&self, key: &StakeKey) {
        let stall = self.faults().stalled_writes.get(key).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, kind: WriteKind, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        let (declined, raced) = {
            let mut faults = self.faults();
            (
                faults.declined_writes.contains(key),
                faults.raced_writes.remove(key),
            )
        };
        if raced {
            let current = self.snapshot(key).current_trade_value;
            self.settle(key, current);
        }
        let result = if declined {
            Err(LedgerError::WriteFailed {
                key: *key,
                cause: WriteFailure::Declined("user_rejected".to_string()),
            })
        } else {
            match kind {
                WriteKind::Update => self.memory.set_trade_value(key, value),
                WriteKind::Exit => self.memory.settle(key, value),
            }
        };
        self.faults().writes.push(WriteCall {
            kind,
            key: *key,
            value,
            accepted: result.is_ok(),
        });
        result
    }
}

impl Ledger for MockLedger {
    async fn stakeholders(&self) -> Result<Vec<Address>, LedgerError> {
        if self.faults().unavailable {
            return Err(LedgerError::Unavailable("event log query failed".to_string()));
        }
        self.memory.stakeholders().await
    }

    async fn stake_count(&self, address: &Address) -> Result<u64, LedgerError> {
        self.memory.stake_count(address).await
    }

    async fn stake_details(&self, address: &Address, index: u64) -> Result<Stake, LedgerError> {
        let key = StakeKey::new(*address, index);
        let (failing, stall) = {
            let faults = self.faults();
            (
                faults.failing_reads.contains(&key),
                faults.stalled_reads.get(&key).copied(),
            )
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(LedgerError::StakeNotFound {
                address: *address,
                index,
            });
        }
        self.memory.stake_details(address, index).await
    }

    async fn update_trade_value(&self, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        self.stall_write(key).await;
        self.record(WriteKind::Update, key, value)
    }

    async fn exit_trade(&self, key: &StakeKey, value: Amount) -> Result<(), LedgerError> {
        self.stall_write(key).await;
        self.record(WriteKind::Exit, key, value)
    }
}
