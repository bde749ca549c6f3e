use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// A source family. Each family produces one canonical dataset per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Season/stat-table site with multi-level table headers (FBref-style).
    StatsSite,
    /// The official rate-limited fantasy API.
    OfficialApi,
    /// Per-match player statistics site (SofaScore-style).
    MatchSite,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::StatsSite => "stats_site",
            Source::OfficialApi => "official_api",
            Source::MatchSite => "match_site",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one job goes and gets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// One stat table on a season page, e.g. season "2024-2025" table "stats_standard".
    SeasonTable { season: String, table: String },
    /// The season fixture list with scores and xG.
    SeasonFixtures { season: String },
    /// One team's all-competition match log for a season.
    TeamSeasonLog { team: String, squad_id: String, season: String },
    /// One match page on the match-stats site.
    Match { match_id: String },
    /// The API player directory (names, teams, positions, prices).
    PlayerDirectory,
    /// One player's gameweek history from the API.
    PlayerHistory { player_id: u32 },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::SeasonTable { season, table } => write!(f, "{season}/{table}"),
            Target::SeasonFixtures { season } => write!(f, "{season}/fixtures"),
            Target::TeamSeasonLog { team, season, .. } => write!(f, "{team}/{season}/matchlog"),
            Target::Match { match_id } => write!(f, "match/{match_id}"),
            Target::PlayerDirectory => write!(f, "player-directory"),
            Target::PlayerHistory { player_id } => write!(f, "player/{player_id}/history"),
        }
    }
}

/// Logical dataset a record belongs to. Records from different sources that
/// describe the same kind of row land in the same family and are merged by
/// canonical key there; each family is persisted as one dataset per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Season-level player rows (stat tables, API player directory).
    PlayerSeasons,
    /// Per-match/per-gameweek player rows (match pages, API histories).
    PlayerMatches,
    /// Season fixture lists.
    Fixtures,
    /// Team match logs.
    TeamMatches,
}

impl Family {
    pub fn of(target: &Target) -> Family {
        match target {
            Target::SeasonTable { .. } | Target::PlayerDirectory => Family::PlayerSeasons,
            Target::Match { .. } | Target::PlayerHistory { .. } => Family::PlayerMatches,
            Target::SeasonFixtures { .. } => Family::Fixtures,
            Target::TeamSeasonLog { .. } => Family::TeamMatches,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::PlayerSeasons => "player_seasons",
            Family::PlayerMatches => "player_matches",
            Family::Fixtures => "fixtures",
            Family::TeamMatches => "team_matches",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of acquisition work, as enumerated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub source: Source,
    pub target: Target,
    #[serde(default)]
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

/// Outcome of a single fetch try. Recorded per attempt and used to drive
/// endpoint health and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Connection,
    Blocked,
    RateLimited,
    ParseError,
}

impl AttemptOutcome {
    /// Whether this outcome counts against the endpoint that served it.
    /// Parse errors and throttles are content/pace problems, not egress
    /// health problems.
    pub fn strikes_endpoint(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Timeout | AttemptOutcome::Connection | AttemptOutcome::Blocked
        )
    }

    pub fn from_error(e: &FetchError) -> Self {
        match e {
            FetchError::Transient(msg) if msg.contains("timed out") => AttemptOutcome::Timeout,
            FetchError::Transient(_) => AttemptOutcome::Connection,
            FetchError::Blocked(_) => AttemptOutcome::Blocked,
            FetchError::RateLimited { .. } => AttemptOutcome::RateLimited,
            FetchError::ParseAnomaly(_) => AttemptOutcome::ParseError,
            // Config errors abort the job without another attempt; mapping
            // exists only so attempt records stay total.
            FetchError::Config(_) => AttemptOutcome::Connection,
        }
    }
}

/// One fetch try for a job. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub endpoint_id: usize,
    pub profile_idx: usize,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub at: DateTime<Utc>,
}

/// A single typed field value. `Missing` is an explicit sentinel; zero is a
/// valid stat value and must never stand in for absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Num(f64),
    Missing,
}

impl FieldValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

/// Normalized identity used to merge records describing the same real-world
/// entity across sources. Construction goes through the consolidator's
/// normalization so that key comparison always sees folded, aliased names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity: String,
    pub team: String,
    pub season: String,
    /// Logical scope within the season (gameweek, match date) when the row
    /// is narrower than season-level. Two records with equal entity/team/
    /// season but different scopes are distinct rows, not duplicates.
    pub scope: Option<String>,
}

/// The parsed structured output of one successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: Source,
    pub entity: String,
    pub team: String,
    pub season: String,
    pub scope: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Missing)
    }
}
