use crate::constants::BPS_DENOMINATOR;
use thiserror::Error;

/// Token amount in base units (18 decimal fixed point).
pub type Amount = u128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid digit in amount: {0}")]
    InvalidDigit(String),
    #[error("too many decimal points in amount: {0}")]
    MultiplePoints(String),
    #[error("amount overflows: {0}")]
    Overflow(String),
}

/// Returns `floor(amount * bps / 10_000)` without intermediate overflow.
pub fn portion(amount: Amount, bps: u32) -> Amount {
    let denominator = BPS_DENOMINATOR as u128;
    let bps = bps as u128;
    let whole = (amount / denominator).saturating_mul(bps);
    let rest = (amount % denominator) * bps / denominator;
    whole.saturating_add(rest)
}

/// Signed change of `value` relative to `basis`, in basis points.
///
/// Returns 0 when `basis` is zero.
pub fn change_bps(basis: Amount, value: Amount) -> i64 {
    if basis == 0 {
        return 0;
    }
    let denominator = BPS_DENOMINATOR as u128;
    let (diff, negative) = if value >= basis {
        (value - basis, false)
    } else {
        (basis - value, true)
    };
    let magnitude = (diff / basis)
        .saturating_mul(denominator)
        .saturating_add((diff % basis).saturating_mul(denominator) / basis);
    let magnitude = i64::try_from(magnitude).unwrap_or(i64::MAX);
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Renders a fixed-point amount with at most `display_decimals` fractional digits.
///
/// Trailing zeros are trimmed and zero renders as `"0"`.
pub fn format_amount(value: Amount, decimals: u32, display_decimals: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let divisor = 10u128.pow(decimals);
    let integer = value / divisor;
    let fraction = value % divisor;

    let mut fraction = format!("{fraction:0width$}", width = decimals as usize);
    fraction.truncate(display_decimals as usize);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    }
}

/// Parses a decimal string into a fixed-point amount.
///
/// Fractional digits beyond `decimals` are truncated and empty input is zero.
pub fn parse_amount(text: &str, decimals: u32) -> Result<Amount, AmountError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    let mut parts = text.split('.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(AmountError::MultiplePoints(text.to_string()));
    }
    if !whole
        .chars()
        .chain(fraction.chars())
        .all(|c| c.is_ascii_digit())
    {
        return Err(AmountError::InvalidDigit(text.to_string()));
    }

    let mut fraction = fraction.to_string();
    fraction.truncate(decimals as usize);
    let fraction = format!("{fraction:0<width$}", width = decimals as usize);

    let digits = format!("{whole}{fraction}");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse::<Amount>()
        .map_err(|_| AmountError::Overflow(text.to_string()))
}

/// Serde adapter encoding an [Amount] as a decimal string.
///
/// Plain JSON numbers are accepted on input as long as they fit in a `u64`.
pub mod serde_amount {
    use super::Amount;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AmountInput {
            String(String),
            Number(u64),
        }

        match AmountInput::deserialize(deserializer)? {
            AmountInput::String(raw) => raw.parse::<Amount>().map_err(D::Error::custom),
            AmountInput::Number(value) => Ok(value as Amount),
        }
    }
}
