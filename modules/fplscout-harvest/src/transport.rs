//! Network fetch primitives. A transport performs exactly one fetch and
//! reports a typed failure; retry, rotation, and backoff all live in the
//! job runner so they can be driven deterministically in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use fplscout_common::error::FetchError;

use crate::endpoints::EndpointKind;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Max concurrent Chromium processes. Each instance is heavy (~100MB+ RSS,
/// multiple child processes); containers hit PID/memory limits fast.
const MAX_CONCURRENT_CHROME: usize = 2;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch one URL through the given egress path with the given
    /// User-Agent. Exactly one attempt, no internal retries.
    async fn fetch(
        &self,
        url: &str,
        endpoint: &EndpointKind,
        user_agent: &str,
    ) -> Result<String, FetchError>;

    fn name(&self) -> &str;
}

/// Anti-bot challenge signatures that arrive with a success status. The
/// page body is the only tell in that case.
pub fn detect_block(body: &str) -> Option<&'static str> {
    let signatures: &[(&str, &str)] = &[
        ("captcha", "captcha marker"),
        ("cf-chl", "challenge script"),
        ("just a moment", "challenge interstitial"),
        ("access denied", "access denied page"),
        ("verify you are human", "human verification page"),
        ("pardon our interruption", "bot interstitial"),
    ];
    let lower = body.to_lowercase();
    signatures
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| *label)
}

fn validate_url(url: &str) -> Result<(), FetchError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| FetchError::Config(format!("invalid URL {url}: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FetchError::Config(format!(
            "only http/https URLs are allowed, got: {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

fn retry_after_header(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// --- Plain HTTP transport ---

pub struct HttpTransport {
    /// One client per endpoint; proxies are baked into the client at build
    /// time, User-Agent varies per request.
    clients: Mutex<HashMap<String, reqwest::Client>>,
    proxy_auth: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(proxy_auth: Option<(String, String)>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            proxy_auth,
        }
    }

    fn client_for(&self, endpoint: &EndpointKind) -> Result<reqwest::Client, FetchError> {
        let key = endpoint.label().to_string();
        let mut clients = self.clients.lock().expect("transport client cache poisoned");
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().timeout(FETCH_TIMEOUT);
        if let EndpointKind::Proxy(proxy_url) = endpoint {
            let mut proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| FetchError::Config(format!("invalid proxy {proxy_url}: {e}")))?;
            if let Some((user, pass)) = &self.proxy_auth {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Config(format!("cannot build HTTP client: {e}")))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        endpoint: &EndpointKind,
        user_agent: &str,
    ) -> Result<String, FetchError> {
        validate_url(url)?;
        let client = self.client_for(endpoint)?;

        let resp = client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Transient(format!("request timed out: {e}"))
                } else {
                    FetchError::Transient(format!("connection failed: {e}"))
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Blocked(format!("status {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after: retry_after_header(&resp),
            });
        }
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("unexpected status {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("body read failed: {e}")))?;

        if let Some(signature) = detect_block(&body) {
            return Err(FetchError::Blocked(signature.to_string()));
        }

        info!(url, endpoint = endpoint.label(), bytes = body.len(), "Fetched");
        Ok(body)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// --- Headless Chromium transport ---

/// Fetches a fully rendered DOM via `chromium --dump-dom`. Needed for the
/// match-stats site, which builds its tables in JavaScript, and tolerated by
/// the stats site. Binary location comes from `CHROME_BIN` via config.
pub struct ChromeTransport {
    chrome_bin: String,
    semaphore: Semaphore,
}

impl ChromeTransport {
    pub fn new(chrome_bin: Option<String>) -> Self {
        let chrome_bin = chrome_bin.unwrap_or_else(|| "chromium".to_string());
        info!(chrome_bin = chrome_bin.as_str(), max_concurrent = MAX_CONCURRENT_CHROME, "Using ChromeTransport");
        Self {
            chrome_bin,
            semaphore: Semaphore::new(MAX_CONCURRENT_CHROME),
        }
    }
}

#[async_trait]
impl Transport for ChromeTransport {
    async fn fetch(
        &self,
        url: &str,
        endpoint: &EndpointKind,
        user_agent: &str,
    ) -> Result<String, FetchError> {
        validate_url(url)?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::Transient("Chrome semaphore closed".to_string()))?;

        let tmp_dir = tempfile::tempdir()
            .map_err(|e| FetchError::Transient(format!("cannot create temp profile dir: {e}")))?;

        let mut args = vec![
            "--headless".to_string(),
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--window-size=1920,1200".to_string(),
            format!("--user-agent={user_agent}"),
            format!("--user-data-dir={}", tmp_dir.path().display()),
        ];
        if let EndpointKind::Proxy(proxy_url) = endpoint {
            args.push(format!("--proxy-server={proxy_url}"));
        }
        args.push("--dump-dom".to_string());
        args.push(url.to_string());

        let result = tokio::time::timeout(
            FETCH_TIMEOUT,
            tokio::process::Command::new(&self.chrome_bin)
                .args(&args)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FetchError::Transient(format!("failed to launch Chrome: {e}")));
            }
            Err(_) => {
                return Err(FetchError::Transient(format!(
                    "Chrome timed out after {}s",
                    FETCH_TIMEOUT.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Fork/resource exhaustion is transient; anything else from the
            // browser is treated the same way and left to the attempt cap.
            warn!(url, stderr = %stderr, "Chrome exited with error");
            return Err(FetchError::Transient(format!("Chrome exit: {stderr}")));
        }

        if output.stdout.is_empty() {
            return Err(FetchError::Transient("Chrome returned empty DOM".to_string()));
        }

        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if let Some(signature) = detect_block(&body) {
            return Err(FetchError::Blocked(signature.to_string()));
        }

        info!(url, endpoint = endpoint.label(), bytes = body.len(), "DOM dumped");
        Ok(body)
    }

    fn name(&self) -> &str {
        "chrome"
    }
}
