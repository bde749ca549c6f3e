use std::time::Duration;

use rand::Rng;

/// Backoff tuning shared by the fetch policy and the API client.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            cap: Duration::from_secs(120),
            jitter: Duration::from_secs(1),
        }
    }
}

/// Randomized exponential backoff: `base * 2^(attempt-1)` capped at `cap`,
/// plus uniform jitter in `[0, jitter)`. Attempt 0 (nothing tried yet) gets
/// no delay. Jitter keeps concurrently retrying jobs from synchronizing.
pub fn delay_for_attempt(attempt: u32, cfg: &BackoffConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(16);
    let scaled = cfg.base.saturating_mul(2u32.saturating_pow(exp));
    let capped = scaled.min(cfg.cap);
    capped + jitter(cfg.jitter)
}

fn jitter(cap: Duration) -> Duration {
    let millis = cap.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..millis))
}
