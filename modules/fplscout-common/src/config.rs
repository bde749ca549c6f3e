use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::FetchError;
use crate::types::Source;

/// Process environment configuration. Everything secret or machine-specific
/// comes from the environment; everything describing *what to fetch* comes
/// from the run configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the official fantasy API.
    pub api_base_url: String,
    /// Optional bearer token for the official API.
    pub api_token: Option<String>,
    /// Override for the headless browser binary.
    pub chrome_bin: Option<String>,
    /// Credentials applied to every proxy endpoint that carries none inline.
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    /// Root data directory for datasets and run manifests.
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            api_base_url: env::var("FPL_API_BASE_URL")
                .unwrap_or_else(|_| "https://fantasy.premierleague.com/api".to_string()),
            api_token: env::var("FPL_API_TOKEN").ok().filter(|s| !s.is_empty()),
            chrome_bin: env::var("CHROME_BIN").ok().filter(|s| !s.is_empty()),
            proxy_username: env::var("PROXY_USERNAME").ok().filter(|s| !s.is_empty()),
            proxy_password: env::var("PROXY_PASSWORD").ok().filter(|s| !s.is_empty()),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
        }
    }

    /// Log the effective configuration without leaking secrets.
    pub fn log_redacted(&self) {
        info!(
            api_base_url = self.api_base_url.as_str(),
            api_token = if self.api_token.is_some() { "set" } else { "unset" },
            chrome_bin = self.chrome_bin.as_deref().unwrap_or("(auto)"),
            proxy_auth = if self.proxy_username.is_some() { "set" } else { "unset" },
            data_dir = %self.data_dir.display(),
            "Configuration loaded"
        );
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    120_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_endpoints() -> Vec<String> {
    vec!["direct".to_string()]
}

/// User-Agent profiles rotated across attempts. Desktop browser strings;
/// the pool can be overridden per run.
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.1 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/109.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_source_priority() -> Vec<Source> {
    vec![Source::StatsSite, Source::OfficialApi, Source::MatchSite]
}

fn default_api_max_requests() -> u32 {
    60
}

fn default_api_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamEntry {
    pub name: String,
    pub squad_id: String,
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsSiteConfig {
    pub base_url: String,
    pub competition_id: String,
    pub competition_slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchSiteConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiBudget {
    #[serde(default = "default_api_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_api_window_secs")]
    pub window_secs: u64,
}

impl Default for ApiBudget {
    fn default() -> Self {
        Self {
            max_requests: default_api_max_requests(),
            window_secs: default_api_window_secs(),
        }
    }
}

/// Caller-supplied run configuration: which jobs to enumerate and how hard
/// to push each source.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub stats_site: Option<StatsSiteConfig>,
    pub match_site: Option<MatchSiteConfig>,

    /// Seasons to acquire stat tables and fixtures for, e.g. "2024-2025".
    #[serde(default)]
    pub seasons: Vec<String>,
    /// Stat table ids scraped per season, e.g. "stats_standard".
    #[serde(default)]
    pub stat_tables: Vec<String>,
    /// Teams whose per-season match logs are scraped.
    #[serde(default)]
    pub teams: Vec<TeamEntry>,
    /// Match ids for the match-stats site.
    #[serde(default)]
    pub match_ids: Vec<String>,

    /// Whether to pull the API player directory and histories.
    #[serde(default)]
    pub api_enabled: bool,
    /// Season label stamped on API records (the API only serves the current
    /// season).
    #[serde(default)]
    pub api_season: Option<String>,
    /// Explicit player ids for history jobs; empty means every player in
    /// the directory.
    #[serde(default)]
    pub player_ids: Vec<u32>,
    #[serde(default)]
    pub api_budget: ApiBudget,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Egress paths: the literal "direct" or a proxy URL.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
    /// Fetch pages with the headless browser instead of plain HTTP.
    #[serde(default)]
    pub use_browser: bool,

    #[serde(default = "default_source_priority")]
    pub source_priority: Vec<Source>,
    /// Entity-name alias table, a JSON object of raw → canonical names.
    #[serde(default)]
    pub alias_file: Option<PathBuf>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FetchError::Config(format!("cannot read run config {}: {e}", path.display()))
        })?;
        let cfg: RunConfig = serde_json::from_str(&raw).map_err(|e| {
            FetchError::Config(format!("invalid run config {}: {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if self.endpoints.is_empty() {
            return Err(FetchError::Config("endpoint list is empty".into()));
        }
        if self.user_agents.is_empty() {
            return Err(FetchError::Config("user agent pool is empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(FetchError::Config("max_attempts must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(FetchError::Config("concurrency must be at least 1".into()));
        }
        if (!self.seasons.is_empty() || !self.teams.is_empty()) && self.stats_site.is_none() {
            return Err(FetchError::Config(
                "seasons/teams configured but stats_site is missing".into(),
            ));
        }
        if !self.match_ids.is_empty() && self.match_site.is_none() {
            return Err(FetchError::Config(
                "match_ids configured but match_site is missing".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> RunConfig {
        serde_json::from_str(r#"{ "api_enabled": true }"#).expect("minimal config parses")
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = minimal();
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.endpoints, vec!["direct".to_string()]);
        assert!(cfg.user_agents.len() > 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn seasons_without_stats_site_is_a_config_error() {
        let mut cfg = minimal();
        cfg.seasons = vec!["2024-2025".into()];
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[test]
    fn empty_endpoint_list_is_a_config_error() {
        let mut cfg = minimal();
        cfg.endpoints.clear();
        assert!(matches!(cfg.validate(), Err(FetchError::Config(_))));
    }
}
