//! Trade lifecycle simulation over a staking ledger.
//!
//! Discovery enumerates stakes with a running trade, the [Tracker] moves and
//! eventually settles them on a timer, and [Admin] exposes the same operations
//! to an operator. All three reach the ledger only through [Ledger].

pub mod admin;
pub mod config;
pub mod discovery;
pub mod ledger;
pub mod memory;
pub mod movement;
pub mod settlement;
pub mod tracker;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use admin::{Admin, AdminError, BulkFailure, BulkOutcome, BulkReport, ExitMode, TradeView};
pub use config::{Config, ConfigError, Parameters};
pub use discovery::{discover_active_trades, ActiveTrade, Discovery, Skipped};
pub use ledger::{with_timeout, Ledger, LedgerError, WriteFailure};
pub use memory::{Memory, StakeError, UnstakeError};
pub use movement::{apply_movement, simulate_movement};
pub use settlement::{Outcome, RateRange, Settlement, SettlementMode, SettlementPolicy};
pub use tracker::{PassReport, TrackedTrade, Tracker, TrackerHandle};
