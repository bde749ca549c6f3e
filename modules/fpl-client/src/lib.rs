pub mod error;
pub mod types;

pub use error::{FplError, Result};
pub use types::{Bootstrap, Element, ElementSummary, ElementType, Fixture, GameweekHistory, Team};

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;

use fplscout_common::backoff::{delay_for_attempt, BackoffConfig};
use fplscout_common::config::ApiBudget;

/// Request budget for the official API: at most `max_requests` calls per
/// rolling window. Callers block in `acquire` until a slot frees up, so the
/// budget is enforced no matter how many jobs share the client.
pub struct RateBudget {
    max_requests: u32,
    window: Duration,
    state: Mutex<BudgetWindow>,
}

struct BudgetWindow {
    started: Instant,
    used: u32,
}

impl RateBudget {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(BudgetWindow {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Take one request slot, waiting for the window to roll over if the
    /// budget is spent. The lock is never held across the sleep.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut w = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(w.started) >= self.window {
                    w.started = now;
                    w.used = 0;
                }
                if w.used < self.max_requests {
                    w.used += 1;
                    return;
                }
                self.window - now.duration_since(w.started)
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "API budget spent, waiting for window");
            tokio::time::sleep(wait).await;
        }
    }
}

impl From<&ApiBudget> for RateBudget {
    fn from(cfg: &ApiBudget) -> Self {
        RateBudget::new(cfg.max_requests, Duration::from_secs(cfg.window_secs))
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Wait before the next attempt: the upstream-mandated Retry-After when one
/// was given, never less than the computed backoff for this attempt.
fn throttle_wait(mandated: Option<Duration>, attempt: u32, backoff: &BackoffConfig) -> Duration {
    delay_for_attempt(attempt, backoff).max(mandated.unwrap_or(Duration::ZERO))
}

fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub struct FplClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    budget: RateBudget,
    retry: RetryConfig,
}

impl FplClient {
    pub fn new(base_url: &str, token: Option<&str>, budget: RateBudget, retry: RetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            budget,
            retry,
        }
    }

    /// Fetch the master player directory with team and position lookups.
    pub async fn bootstrap_static(&self) -> Result<Bootstrap> {
        tracing::info!("Fetching bootstrap data");
        let data: Bootstrap = self.get_json("bootstrap-static/").await?;
        tracing::info!(players = data.elements.len(), teams = data.teams.len(), "Bootstrap fetched");
        Ok(data)
    }

    /// Fetch one player's detailed gameweek history.
    pub async fn element_summary(&self, player_id: u32) -> Result<ElementSummary> {
        let summary: ElementSummary = self
            .get_json(&format!("element-summary/{player_id}/"))
            .await?;
        tracing::debug!(player_id, gameweeks = summary.history.len(), "Player history fetched");
        Ok(summary)
    }

    /// Fetch fixtures, optionally restricted to one gameweek.
    pub async fn fixtures(&self, event: Option<u32>) -> Result<Vec<Fixture>> {
        let path = match event {
            Some(ev) => format!("fixtures/?event={ev}"),
            None => "fixtures/".to_string(),
        };
        let fixtures: Vec<Fixture> = self.get_json(&path).await?;
        tracing::info!(count = fixtures.len(), "Fixtures fetched");
        Ok(fixtures)
    }

    /// GET with budget, retry, and backoff. Calls are read-only, so retry is
    /// always safe. Terminal 4xx responses fail fast; timeouts, 5xx, and
    /// throttles retry until the attempt cap, then surface as typed errors
    /// rather than partial data.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let mut mandated: Option<Duration> = None;
        let mut last_mandated: Option<Duration> = None;
        let mut rate_limited = false;
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let wait = throttle_wait(mandated.take(), attempt, &self.retry.backoff);
                tracing::debug!(
                    path,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "Retrying API call after backoff"
                );
                tokio::time::sleep(wait).await;
            }
            self.budget.acquire().await;

            let mut req = self.client.get(&url);
            if let Some(ref token) = self.token {
                req = req.bearer_auth(token);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    rate_limited = false;
                    last_error = e.to_string();
                    tracing::warn!(path, attempt = attempt + 1, error = %e, "API request failed");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(&resp);
                rate_limited = true;
                last_mandated = retry_after;
                mandated = retry_after;
                last_error = "429 Too Many Requests".to_string();
                tracing::warn!(path, attempt = attempt + 1, retry_after_secs = retry_after.map(|d| d.as_secs()), "API throttled");
                continue;
            }
            if status.is_server_error() {
                rate_limited = false;
                last_error = format!("status {status}");
                tracing::warn!(path, attempt = attempt + 1, status = status.as_u16(), "API server error");
                continue;
            }
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(FplError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return resp
                .json::<T>()
                .await
                .map_err(|e| FplError::Parse(e.to_string()));
        }

        if rate_limited {
            Err(FplError::RateLimited {
                attempts: self.retry.max_attempts,
                retry_after: last_mandated,
            })
        } else {
            Err(FplError::UpstreamUnavailable {
                attempts: self.retry.max_attempts,
                last_error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn mandated_wait_is_honored() {
        // An explicit Retry-After of 30s must floor the wait even when the
        // computed backoff is shorter.
        let wait = throttle_wait(Some(Duration::from_secs(30)), 1, &backoff());
        assert!(wait >= Duration::from_secs(30));
    }

    #[test]
    fn backoff_wins_when_longer_than_mandate() {
        let wait = throttle_wait(Some(Duration::from_secs(1)), 4, &backoff());
        assert_eq!(wait, Duration::from_secs(16));
    }

    #[test]
    fn no_mandate_falls_back_to_backoff() {
        let wait = throttle_wait(None, 2, &backoff());
        assert_eq!(wait, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_allows_window_quota_immediately() {
        let budget = RateBudget::new(3, Duration::from_secs(60));
        let before = Instant::now();
        for _ in 0..3 {
            budget.acquire().await;
        }
        assert_eq!(Instant::now(), before, "quota within the window must not wait");
    }

    #[tokio::test(start_paused = true)]
    async fn budget_blocks_until_window_rolls() {
        let budget = RateBudget::new(2, Duration::from_secs(10));
        let before = Instant::now();
        budget.acquire().await;
        budget.acquire().await;
        budget.acquire().await; // third call must wait for the window
        let waited = Instant::now().duration_since(before);
        assert!(waited >= Duration::from_secs(10), "waited {waited:?}");
    }
}
