use axum::{
    extract::{Path, Query, State as AxumState},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use staketrade_execution::{
    Admin, AdminError, BulkReport, ExitMode, Ledger, LedgerError, Memory, Parameters, Settlement,
    StakeError, UnstakeError, WriteFailure,
};
use staketrade_types::{
    api::{
        BulkError, BulkResponse, BulkSuccess, ErrorBody, ErrorCode, StakeCount, StakeCreated,
        StakeRequest, TradeValue, Unstaked,
    },
    Address, Amount, StakeKey,
};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

pub mod config;

pub use config::{RateLimit, SimulatorConfig, ValidatedConfig};

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// The in-process ledger plus the operator surface acting on it.
pub struct Simulator {
    ledger: Arc<Memory>,
    admin: Admin<Arc<Memory>>,
}

impl Simulator {
    pub fn new(params: Parameters) -> Self {
        let ledger = Arc::new(Memory::new());
        let admin = Admin::new(ledger.clone(), params);
        Self { ledger, admin }
    }

    /// Shared handle for in-process actors such as the tracker.
    pub fn ledger(&self) -> Arc<Memory> {
        self.ledger.clone()
    }

    pub fn admin(&self) -> &Admin<Arc<Memory>> {
        &self.admin
    }

    pub fn stake(&self, request: &StakeRequest) -> Result<StakeCreated, StakeError> {
        let timestamp = request.timestamp.unwrap_or_else(unix_now);
        let index = self.ledger.stake(request.owner, request.amount, timestamp)?;
        let trading_amount = self
            .ledger
            .get(&StakeKey::new(request.owner, index))
            .map_err(|e| StakeError::Unavailable(e.to_string()))?
            .trading_amount;
        Ok(StakeCreated {
            index,
            trading_amount,
        })
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid rate limit (replenish_interval_ms={replenish_interval_ms}, burst={burst})")]
    InvalidRateLimit {
        replenish_interval_ms: u64,
        burst: u32,
    },
}

pub struct Api {
    simulator: Arc<Simulator>,
    rate_limit: RateLimit,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>, rate_limit: RateLimit) -> Self {
        Self {
            simulator,
            rate_limit,
        }
    }

    pub fn router(&self) -> Result<Router, RouterError> {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        // Configure Rate Limiting
        let RateLimit {
            replenish_interval_ms,
            burst,
        } = self.rate_limit;
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_millisecond(replenish_interval_ms)
                .burst_size(burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .ok_or(RouterError::InvalidRateLimit {
                    replenish_interval_ms,
                    burst,
                })?,
        );

        Ok(Router::new()
            .route("/ledger/events", get(events))
            .route("/ledger/stakeholders", get(stakeholders))
            .route("/ledger/stakes", post(stake))
            .route("/ledger/stakes/:address", get(stake_count))
            .route("/ledger/stakes/:address/:index", get(stake_details))
            .route("/ledger/stakes/:address/:index/value", post(update_trade_value))
            .route("/ledger/stakes/:address/:index/exit", post(exit_trade))
            .route("/ledger/stakes/:address/:index/unstake", post(unstake))
            .route("/admin/trades", get(active_trades))
            .route("/admin/trades/update", post(update_all))
            .route("/admin/trades/exit", post(exit_all))
            .route("/admin/trades/:address/:index/update", post(update_one))
            .route("/admin/trades/:address/:index/exit", post(exit_one))
            .layer(cors)
            .layer(GovernorLayer {
                config: governor_conf,
            })
            .with_state(self.simulator.clone()))
    }
}

/// Error response: a status plus a JSON [ErrorBody].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            LedgerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable),
            LedgerError::StakeNotFound { .. } => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            LedgerError::Timeout { .. } => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Timeout),
            LedgerError::WriteFailed { cause, .. } => match cause {
                WriteFailure::AlreadySettled => (StatusCode::CONFLICT, ErrorCode::AlreadySettled),
                WriteFailure::StakeInactive => (StatusCode::CONFLICT, ErrorCode::StakeInactive),
                WriteFailure::Declined(_) => (StatusCode::CONFLICT, ErrorCode::Declined),
                WriteFailure::Transport(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable)
                }
            },
        };
        Self::new(status, code, message)
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Ledger(err) => err.into(),
            AdminError::NotActive(_) => {
                Self::new(StatusCode::CONFLICT, ErrorCode::NotActive, err.to_string())
            }
        }
    }
}

impl From<StakeError> for ApiError {
    fn from(err: StakeError) -> Self {
        match err {
            StakeError::ZeroAmount => Self::invalid_request(err.to_string()),
            StakeError::Unavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::Unavailable,
                err.to_string(),
            ),
        }
    }
}

impl From<UnstakeError> for ApiError {
    fn from(err: UnstakeError) -> Self {
        let (status, code) = match err {
            UnstakeError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            UnstakeError::Locked { .. } => (StatusCode::CONFLICT, ErrorCode::Locked),
            UnstakeError::TradeActive(_) => (StatusCode::CONFLICT, ErrorCode::TradeActive),
            UnstakeError::Withdrawn(_) => (StatusCode::CONFLICT, ErrorCode::Withdrawn),
            UnstakeError::Unavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable)
            }
        };
        Self::new(status, code, err.to_string())
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|err| ApiError::invalid_request(format!("{err}")))
}

fn parse_key(raw: &str, index: u64) -> Result<StakeKey, ApiError> {
    Ok(StakeKey::new(parse_address(raw)?, index))
}

fn bulk_response<T, U>(report: BulkReport<T>, result: impl Fn(T) -> U) -> BulkResponse<U> {
    let outcome = report.outcome();
    BulkResponse {
        outcome,
        succeeded: report
            .succeeded
            .into_iter()
            .map(|(key, value)| BulkSuccess {
                key,
                result: result(value),
            })
            .collect(),
        failed: report
            .failed
            .into_iter()
            .map(|failure| BulkError {
                key: failure.key,
                error: ApiError::from(failure.error).body,
            })
            .collect(),
    }
}

#[derive(Debug, Deserialize)]
struct ExitParams {
    mode: ExitMode,
}

type ApiResult<T> = Result<T, ApiError>;

async fn events(AxumState(simulator): AxumState<Arc<Simulator>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(simulator.ledger.events()?))
}

async fn stakeholders(
    AxumState(simulator): AxumState<Arc<Simulator>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(simulator.ledger.stakeholders().await?))
}

async fn stake(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<StakeRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = simulator.stake(&request)?;
    info!(owner = %request.owner, index = created.index, amount = request.amount, "staked");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn stake_count(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(address): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let address = parse_address(&address)?;
    let count = simulator.ledger.stake_count(&address).await?;
    Ok(Json(StakeCount { count }))
}

async fn stake_details(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path((address, index)): Path<(String, u64)>,
) -> ApiResult<impl IntoResponse> {
    let address = parse_address(&address)?;
    Ok(Json(simulator.ledger.stake_details(&address, index).await?))
}

async fn update_trade_value(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path((address, index)): Path<(String, u64)>,
    Json(TradeValue { value }): Json<TradeValue>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&address, index)?;
    let result = simulator.ledger.update_trade_value(&key, value).await;
    write(&key, "update_trade_value", value, result)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn exit_trade(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path((address, index)): Path<(String, u64)>,
    Json(TradeValue { value }): Json<TradeValue>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&address, index)?;
    let result = simulator.ledger.exit_trade(&key, value).await;
    write(&key, "exit_trade", value, result)?;
    Ok(StatusCode::NO_CONTENT)
}

fn write(
    key: &StakeKey,
    operation: &'static str,
    value: Amount,
    result: Result<(), LedgerError>,
) -> Result<(), LedgerError> {
    match &result {
        Ok(()) => info!(%key, operation, value, "ledger write"),
        Err(err) => warn!(%key, operation, value, ?err, "ledger write rejected"),
    }
    result
}

async fn unstake(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path((address, index)): Path<(String, u64)>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&address, index)?;
    let amount = simulator.ledger.unstake(&key, unix_now())?;
    info!(%key, amount, "unstaked");
    Ok(Json(Unstaked { amount }))
}

async fn active_trades(
    AxumState(simulator): AxumState<Arc<Simulator>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(simulator.admin.active_trades().await?))
}

async fn update_all(
    AxumState(simulator): AxumState<Arc<Simulator>>,
) -> ApiResult<impl IntoResponse> {
    let report = simulator.admin.update_all().await?;
    Ok(Json(bulk_response(report, |value| TradeValue { value })))
}

async fn exit_all(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Query(ExitParams { mode }): Query<ExitParams>,
) -> ApiResult<impl IntoResponse> {
    let report = simulator.admin.exit_all(mode).await?;
    Ok(Json(bulk_response(report, |settlement: Settlement| settlement)))
}

async fn update_one(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path((address, index)): Path<(String, u64)>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&address, index)?;
    let value = simulator.admin.update_one(&key).await?;
    Ok(Json(TradeValue { value }))
}

async fn exit_one(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path((address, index)): Path<(String, u64)>,
    Query(ExitParams { mode }): Query<ExitParams>,
) -> ApiResult<impl IntoResponse> {
    let key = parse_key(&address, index)?;
    Ok(Json(simulator.admin.exit_one(&key, mode).await?))
}
