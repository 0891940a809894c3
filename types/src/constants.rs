/// Decimal places of the staked token.
pub const DECIMALS: u32 = 18;

/// Denominator for every percentage expressed in basis points.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Share of each stake allocated to the simulated trade (2%).
pub const TRADING_ALLOCATION_BPS: u32 = 200;

/// Seconds a stake stays locked after creation (10 minutes).
pub const LOCK_PERIOD_SECS: u64 = 10 * 60;

/// Period of the trade simulation pass.
pub const UPDATE_INTERVAL_SECS: u64 = 30;

/// Time a trade is tracked before it is settled (5 minutes).
pub const EXIT_AFTER_SECS: u64 = 5 * 60;

/// Upper bound on a single ledger call before it is treated as failed.
pub const OPERATION_TIMEOUT_SECS: u64 = 10;

/// Maximum movement of a trade value in one step (5%).
pub const VOLATILITY_BPS: u32 = 500;

/// Probability that a natural settlement closes in profit (70%).
pub const NATURAL_PROFIT_PROBABILITY_BPS: u32 = 7_000;

/// Profit applied to the trading amount on natural settlement (5-20%).
pub const NATURAL_PROFIT_MIN_BPS: u32 = 500;
pub const NATURAL_PROFIT_MAX_BPS: u32 = 2_000;

/// Loss applied to the trading amount on natural settlement (0-10%).
pub const NATURAL_LOSS_MIN_BPS: u32 = 0;
pub const NATURAL_LOSS_MAX_BPS: u32 = 1_000;

/// Profit applied by an operator-forced profitable exit (10-20%).
pub const FORCED_PROFIT_MIN_BPS: u32 = 1_000;
pub const FORCED_PROFIT_MAX_BPS: u32 = 2_000;

/// Loss applied by an operator-forced losing exit (0-10%).
pub const FORCED_LOSS_MIN_BPS: u32 = 0;
pub const FORCED_LOSS_MAX_BPS: u32 = 1_000;
