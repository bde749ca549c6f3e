use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for acquisition work. Everything except `Config` is
/// recoverable by retry inside the job runner or API client; exhausting the
/// attempt cap converts a retryable error into a terminal per-job failure.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Timeout, connection reset, 5xx. Safe to retry as-is.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anti-bot challenge, CAPTCHA marker, 403. Retried via endpoint and
    /// header-profile rotation; escalates endpoint health.
    #[error("blocked by target: {0}")]
    Blocked(String),

    /// Explicit throttling signal. When the upstream names a wait, the next
    /// attempt must not be issued before it elapses.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Structurally malformed content (expected table absent, empty body).
    /// Often a partial page load, so retried a bounded number of times.
    #[error("parse anomaly: {0}")]
    ParseAnomaly(String),

    /// Missing credentials, unreadable run config, invalid job target.
    /// Fatal immediately, never retried.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Config(_))
    }

    /// Wait the upstream mandated, if it named one.
    pub fn mandated_wait(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_retryable() {
        assert!(!FetchError::Config("missing token".into()).is_retryable());
    }

    #[test]
    fn all_other_classes_are_retryable() {
        assert!(FetchError::Transient("timeout".into()).is_retryable());
        assert!(FetchError::Blocked("captcha".into()).is_retryable());
        assert!(FetchError::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchError::ParseAnomaly("table absent".into()).is_retryable());
    }

    #[test]
    fn mandated_wait_only_on_rate_limit() {
        let e = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(e.mandated_wait(), Some(Duration::from_secs(30)));
        assert_eq!(FetchError::Transient("reset".into()).mandated_wait(), None);
    }
}
