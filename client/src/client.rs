use crate::{Error, Result};
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Serialize};
use staketrade_execution::{ExitMode, Ledger, LedgerError, Settlement, TradeView, WriteFailure};
use staketrade_types::{
    api::{
        BulkResponse, ErrorBody, ErrorCode, StakeCount, StakeCreated, StakeRequest, TradeValue,
        Unstaked,
    },
    Address, Amount, Stake, StakeKey, StakedEvent,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (e.g., POST) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// Staketrade simulator API client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self
            .send_with_retry(reqwest::Method::GET, || self.http_client.get(url.clone()))
            .await?;
        decode(response).await
    }

    async fn post<B: Serialize>(&self, path: &str, body: Option<&B>) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        let response = self
            .send_with_retry(reqwest::Method::POST, || {
                let request = self.http_client.post(url.clone());
                match body {
                    Some(body) => request.json(body),
                    None => request,
                }
            })
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        Ok(response)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let response = self.post(path, body).await?;
        Ok(response.json().await?)
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts =
            if method == reqwest::Method::GET || self.retry_policy.retry_non_idempotent {
                self.retry_policy.max_attempts.max(1)
            } else {
                1
            };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    debug!(%status, attempt, "retrying request");
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                    debug!(?err, attempt, "retrying request");
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    /// Raw `Staked` event log
    pub async fn events(&self) -> Result<Vec<StakedEvent>> {
        self.get("ledger/events").await
    }

    pub async fn get_stakeholders(&self) -> Result<Vec<Address>> {
        self.get("ledger/stakeholders").await
    }

    pub async fn get_stake_count(&self, address: &Address) -> Result<u64> {
        let count: StakeCount = self.get(&format!("ledger/stakes/{address}")).await?;
        Ok(count.count)
    }

    pub async fn get_stake(&self, key: &StakeKey) -> Result<Stake> {
        self.get(&stake_path(key)).await
    }

    pub async fn stake(&self, request: &StakeRequest) -> Result<StakeCreated> {
        self.post_json("ledger/stakes", Some(request)).await
    }

    pub async fn set_trade_value(&self, key: &StakeKey, value: Amount) -> Result<()> {
        let path = format!("{}/value", stake_path(key));
        self.post(&path, Some(&TradeValue { value })).await?;
        Ok(())
    }

    pub async fn settle(&self, key: &StakeKey, value: Amount) -> Result<()> {
        let path = format!("{}/exit", stake_path(key));
        self.post(&path, Some(&TradeValue { value })).await?;
        Ok(())
    }

    /// Withdraws a settled, unlocked stake; returns the staked amount.
    pub async fn unstake(&self, key: &StakeKey) -> Result<Amount> {
        let path = format!("{}/unstake", stake_path(key));
        let unstaked: Unstaked = self.post_json(&path, None::<&()>).await?;
        Ok(unstaked.amount)
    }

    pub async fn active_trades(&self) -> Result<Vec<TradeView>> {
        self.get("admin/trades").await
    }

    pub async fn update_all(&self) -> Result<BulkResponse<TradeValue>> {
        self.post_json("admin/trades/update", None::<&()>).await
    }

    pub async fn exit_all(&self, mode: ExitMode) -> Result<BulkResponse<Settlement>> {
        let path = format!("admin/trades/exit?mode={}", mode_param(mode));
        self.post_json(&path, None::<&()>).await
    }

    pub async fn update_one(&self, key: &StakeKey) -> Result<Amount> {
        let path = format!("{}/update", admin_path(key));
        let moved: TradeValue = self.post_json(&path, None::<&()>).await?;
        Ok(moved.value)
    }

    pub async fn exit_one(&self, key: &StakeKey, mode: ExitMode) -> Result<Settlement> {
        let path = format!("{}/exit?mode={}", admin_path(key), mode_param(mode));
        self.post_json(&path, None::<&()>).await
    }
}

fn stake_path(key: &StakeKey) -> String {
    format!("ledger/stakes/{}/{}", key.address, key.index)
}

fn admin_path(key: &StakeKey) -> String {
    format!("admin/trades/{}/{}", key.address, key.index)
}

fn mode_param(mode: ExitMode) -> &'static str {
    match mode {
        ExitMode::Current => "current",
        ExitMode::Profit => "profit",
        ExitMode::Loss => "loss",
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    Ok(response.json().await?)
}

async fn error_from(response: reqwest::Response) -> Error {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => Error::Api { status, body },
        Err(_) => Error::Failed(status),
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

impl Error {
    fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Api { body, .. } => Some(body.code),
            _ => None,
        }
    }

    /// Maps a failed read onto the ledger contract.
    fn into_read_error(self, key: Option<&StakeKey>) -> LedgerError {
        match (self.code(), key) {
            (Some(ErrorCode::NotFound), Some(key)) => LedgerError::StakeNotFound {
                address: key.address,
                index: key.index,
            },
            _ => LedgerError::Unavailable(self.to_string()),
        }
    }

    /// Maps a failed write onto the ledger contract.
    fn into_write_error(self, key: &StakeKey) -> LedgerError {
        let cause = match &self {
            Error::Api { body, .. } => match body.code {
                ErrorCode::NotFound => {
                    return LedgerError::StakeNotFound {
                        address: key.address,
                        index: key.index,
                    }
                }
                ErrorCode::AlreadySettled => WriteFailure::AlreadySettled,
                ErrorCode::StakeInactive | ErrorCode::Withdrawn => WriteFailure::StakeInactive,
                ErrorCode::Unavailable | ErrorCode::Timeout => {
                    WriteFailure::Transport(body.message.clone())
                }
                _ => WriteFailure::Declined(body.message.clone()),
            },
            _ => WriteFailure::Transport(self.to_string()),
        };
        LedgerError::WriteFailed { key: *key, cause }
    }
}

impl Ledger for Client {
    async fn stakeholders(&self) -> std::result::Result<Vec<Address>, LedgerError> {
        self.get_stakeholders()
            .await
            .map_err(|err| err.into_read_error(None))
    }

    async fn stake_count(&self, address: &Address) -> std::result::Result<u64, LedgerError> {
        self.get_stake_count(address)
            .await
            .map_err(|err| err.into_read_error(None))
    }

    async fn stake_details(
        &self,
        address: &Address,
        index: u64,
    ) -> std::result::Result<Stake, LedgerError> {
        let key = StakeKey::new(*address, index);
        self.get_stake(&key)
            .await
            .map_err(|err| err.into_read_error(Some(&key)))
    }

    async fn update_trade_value(
        &self,
        key: &StakeKey,
        value: Amount,
    ) -> std::result::Result<(), LedgerError> {
        self.set_trade_value(key, value)
            .await
            .map_err(|err| err.into_write_error(key))
    }

    async fn exit_trade(
        &self,
        key: &StakeKey,
        value: Amount,
    ) -> std::result::Result<(), LedgerError> {
        self.settle(key, value)
            .await
            .map_err(|err| err.into_write_error(key))
    }
}
