use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FplError>;

#[derive(Debug, Error)]
pub enum FplError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// Throttled and retries exhausted. `retry_after` is the last wait the
    /// upstream mandated, if any.
    #[error("Rate limited after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// Transient upstream failures (timeouts, 5xx) outlasted the retry
    /// budget. Never returns partial or stale data instead.
    #[error("Upstream unavailable after {attempts} attempts: {last_error}")]
    UpstreamUnavailable { attempts: u32, last_error: String },
}

impl From<reqwest::Error> for FplError {
    fn from(err: reqwest::Error) -> Self {
        FplError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FplError {
    fn from(err: serde_json::Error) -> Self {
        FplError::Parse(err.to_string())
    }
}
