//! JSON bodies exchanged between the simulator and its clients.

use crate::{amount::serde_amount, Address, Amount, StakeKey};
use serde::{Deserialize, Serialize};

/// Machine-readable reason attached to every error response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadySettled,
    StakeInactive,
    Declined,
    NotActive,
    Locked,
    TradeActive,
    Withdrawn,
    InvalidRequest,
    Unavailable,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRequest {
    pub owner: Address,
    #[serde(with = "serde_amount")]
    pub amount: Amount,
    /// Backdates the stake; the server clock is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeCreated {
    pub index: u64,
    #[serde(with = "serde_amount")]
    pub trading_amount: Amount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeCount {
    pub count: u64,
}

/// A trade value, either written by a client or produced by the admin surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeValue {
    #[serde(with = "serde_amount")]
    pub value: Amount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unstaked {
    #[serde(with = "serde_amount")]
    pub amount: Amount,
}

/// Aggregate result of an operation applied to many trades.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOutcome {
    Succeeded,
    Partial,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSuccess<T> {
    #[serde(flatten)]
    pub key: StakeKey,
    pub result: T,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkError {
    #[serde(flatten)]
    pub key: StakeKey,
    pub error: ErrorBody,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse<T> {
    pub outcome: BulkOutcome,
    pub succeeded: Vec<BulkSuccess<T>>,
    pub failed: Vec<BulkError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ADDRESS_LENGTH;

    #[test]
    fn test_stake_request_accepts_string_amounts() {
        let owner = Address::new([2; ADDRESS_LENGTH]);
        let json = format!(
            r#"{{"owner":"{owner}","amount":"50000000000000000000000"}}"#
        );
        let request: StakeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.amount, 50_000 * 10u128.pow(18));
        assert_eq!(request.timestamp, None);
        assert_eq!(serde_json::to_string(&request).unwrap(), json);
    }

    #[test]
    fn test_bulk_entries_flatten_key() {
        let key = StakeKey::new(Address::new([3; ADDRESS_LENGTH]), 4);
        let failure = BulkError {
            key,
            error: ErrorBody {
                code: ErrorCode::AlreadySettled,
                message: "trade already settled".to_string(),
            },
        };
        let value: serde_json::Value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["index"], 4);
        assert_eq!(value["address"], key.address.to_string());
        assert_eq!(value["error"]["code"], "already_settled");
        assert_eq!(serde_json::from_value::<BulkError>(value).unwrap(), failure);
    }
}
