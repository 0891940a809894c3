pub mod client;
pub mod config;

pub use client::Client;
pub use client::RetryPolicy;
pub use config::{RetryConfig, TrackerConfig, ValidatedTrackerConfig};
use staketrade_types::api::ErrorBody;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("request rejected ({status}): {}", .body.message)]
    Api {
        status: reqwest::StatusCode,
        body: ErrorBody,
    },
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
