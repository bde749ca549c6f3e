//! The run loop: expands the job list, drives scrape jobs through the
//! runner with bounded parallelism, pulls the official API, consolidates
//! per family, writes datasets, and saves the run manifest.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use fpl_client::{Element, FplClient, GameweekHistory, RateBudget, RetryConfig};
use fplscout_common::backoff::BackoffConfig;
use fplscout_common::config::{Config, RunConfig};
use fplscout_common::error::FetchError;
use fplscout_common::types::{Family, FieldValue, JobSpec, RawRecord, Source, Target};

use crate::consolidate::{AliasTable, Consolidator};
use crate::dataset::Dataset;
use crate::endpoints::{EndpointKind, EndpointPool};
use crate::jobs;
use crate::manifest::RunManifest;
use crate::runner::{CancelFlag, FinishedJob, JobOutcome, JobRunner, Sleeper, TokioSleeper};
use crate::transport::{ChromeTransport, HttpTransport, Transport};

/// Stats from a harvest run.
#[derive(Debug, Default, Serialize)]
pub struct HarvestStats {
    pub jobs_total: u32,
    pub jobs_succeeded: u32,
    pub jobs_failed: u32,
    pub jobs_cancelled: u32,
    pub records_parsed: u64,
    pub rows_written: u64,
    pub datasets_written: u32,
}

impl std::fmt::Display for HarvestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Harvest Run Complete ===")?;
        writeln!(f, "Jobs total:       {}", self.jobs_total)?;
        writeln!(f, "Jobs succeeded:   {}", self.jobs_succeeded)?;
        writeln!(f, "Jobs failed:      {}", self.jobs_failed)?;
        writeln!(f, "Jobs cancelled:   {}", self.jobs_cancelled)?;
        writeln!(f, "Records parsed:   {}", self.records_parsed)?;
        writeln!(f, "Rows written:     {}", self.rows_written)?;
        writeln!(f, "Datasets written: {}", self.datasets_written)?;
        Ok(())
    }
}

fn backoff_config(cfg: &RunConfig) -> BackoffConfig {
    BackoffConfig {
        base: Duration::from_millis(cfg.base_delay_ms),
        cap: Duration::from_millis(cfg.max_delay_ms),
        jitter: Duration::from_millis(cfg.jitter_ms),
    }
}

pub struct Harvester {
    env: Config,
    cfg: RunConfig,
    pool: Arc<EndpointPool>,
    transport: Arc<dyn Transport>,
    api: Option<FplClient>,
    aliases: AliasTable,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancelFlag,
}

impl Harvester {
    pub fn new(env: Config, cfg: RunConfig) -> Result<Self, FetchError> {
        cfg.validate()?;

        let kinds: Vec<EndpointKind> = cfg.endpoints.iter().map(|e| EndpointKind::parse(e)).collect();
        let pool = Arc::new(EndpointPool::new(
            kinds,
            Duration::from_secs(cfg.cooldown_secs),
        ));

        let transport: Arc<dyn Transport> = if cfg.use_browser {
            Arc::new(ChromeTransport::new(env.chrome_bin.clone()))
        } else {
            let proxy_auth = env
                .proxy_username
                .clone()
                .zip(env.proxy_password.clone());
            Arc::new(HttpTransport::new(proxy_auth))
        };

        let api = if cfg.api_enabled {
            Some(FplClient::new(
                &env.api_base_url,
                env.api_token.as_deref(),
                RateBudget::from(&cfg.api_budget),
                RetryConfig {
                    max_attempts: cfg.max_attempts,
                    backoff: backoff_config(&cfg),
                },
            ))
        } else {
            None
        };

        let aliases = match &cfg.alias_file {
            Some(path) => AliasTable::load(path)?,
            None => AliasTable::empty(),
        };

        Ok(Self {
            env,
            cfg,
            pool,
            transport,
            api,
            aliases,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancelFlag::new(),
        })
    }

    /// Clone of the run-level cancellation flag, for signal handlers.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<HarvestStats> {
        let mut stats = HarvestStats::default();
        let mut manifest = RunManifest::new();
        let mut consolidators: BTreeMap<Family, Consolidator> = BTreeMap::new();

        // Resolve every scrape URL up front; a bad target is a
        // configuration error and aborts the run before any fetch.
        let mut scrape_jobs = Vec::new();
        for spec in jobs::scrape_jobs(&self.cfg) {
            let url = jobs::scrape_url(&spec, &self.cfg)?;
            scrape_jobs.push((spec, url));
        }
        stats.jobs_total += scrape_jobs.len() as u32;

        let runner = JobRunner {
            transport: self.transport.clone(),
            pool: self.pool.clone(),
            profiles: Arc::new(self.cfg.user_agents.clone()),
            backoff: backoff_config(&self.cfg),
            max_attempts: self.cfg.max_attempts,
            sleeper: self.sleeper.clone(),
            cancel: self.cancel.clone(),
        };

        info!(
            jobs = scrape_jobs.len(),
            concurrency = self.cfg.concurrency,
            transport = self.transport.name(),
            "Starting scrape jobs"
        );
        let runner_ref = &runner;
        let finished: Vec<FinishedJob> = stream::iter(
            scrape_jobs
                .into_iter()
                .map(|(spec, url)| async move { runner_ref.run(spec, url).await }),
        )
        .buffer_unordered(self.cfg.concurrency)
        .collect()
        .await;

        for job in finished {
            self.fold_finished(job, &mut consolidators, &mut manifest, &mut stats);
        }

        if let Some(api) = &self.api {
            self.run_api(api, &mut consolidators, &mut manifest, &mut stats)
                .await;
        }

        for (family, consolidator) in &consolidators {
            let dataset = Dataset::from_consolidator(*family, consolidator);
            if dataset.is_empty() {
                continue;
            }
            dataset
                .write_csv(&self.env.data_dir)
                .with_context(|| format!("writing {family} dataset"))?;
            stats.rows_written += dataset.len() as u64;
            stats.datasets_written += 1;
        }

        manifest.save(&stats, &self.env.data_dir)?;
        Ok(stats)
    }

    fn fold_finished(
        &self,
        job: FinishedJob,
        consolidators: &mut BTreeMap<Family, Consolidator>,
        manifest: &mut RunManifest,
        stats: &mut HarvestStats,
    ) {
        match job.outcome {
            JobOutcome::Succeeded(records) => {
                stats.jobs_succeeded += 1;
                stats.records_parsed += records.len() as u64;
                self.consolidator_for(consolidators, Family::of(&job.spec.target))
                    .merge(records);
            }
            JobOutcome::Failed(error) => {
                stats.jobs_failed += 1;
                manifest.record_failure(job.spec, error, job.attempts);
            }
            JobOutcome::Cancelled => {
                stats.jobs_cancelled += 1;
                manifest.record_cancelled(job.spec);
            }
        }
    }

    fn consolidator_for<'a>(
        &self,
        consolidators: &'a mut BTreeMap<Family, Consolidator>,
        family: Family,
    ) -> &'a mut Consolidator {
        consolidators.entry(family).or_insert_with(|| {
            Consolidator::new(self.cfg.source_priority.clone(), self.aliases.clone())
        })
    }

    /// Pull the official API: the player directory, then per-player
    /// gameweek histories. Failures are recorded per job in the manifest;
    /// the client already retried internally, so there is no attempt
    /// history to attach beyond its own summary.
    async fn run_api(
        &self,
        api: &FplClient,
        consolidators: &mut BTreeMap<Family, Consolidator>,
        manifest: &mut RunManifest,
        stats: &mut HarvestStats,
    ) {
        let season = self
            .cfg
            .api_season
            .clone()
            .unwrap_or_else(|| "current".to_string());
        let directory_spec = JobSpec {
            source: Source::OfficialApi,
            target: Target::PlayerDirectory,
            priority: 0,
        };

        stats.jobs_total += 1;
        if self.cancel.is_cancelled() {
            stats.jobs_cancelled += 1;
            manifest.record_cancelled(directory_spec);
            return;
        }

        let directory = match api.bootstrap_static().await {
            Ok(directory) => directory,
            Err(e) => {
                warn!(error = %e, "Player directory fetch failed");
                stats.jobs_failed += 1;
                manifest.record_failure(directory_spec, e.to_string(), Vec::new());
                return;
            }
        };
        stats.jobs_succeeded += 1;

        let team_names: HashMap<u32, String> = directory
            .teams
            .iter()
            .map(|t| (t.id, t.name.clone()))
            .collect();
        let position_names: HashMap<u32, String> = directory
            .element_types
            .iter()
            .map(|p| (p.id, p.singular_name_short.clone()))
            .collect();
        let players: HashMap<u32, (String, String)> = directory
            .elements
            .iter()
            .map(|e| {
                let team = team_names.get(&e.team).cloned().unwrap_or_default();
                (e.id, (e.full_name(), team))
            })
            .collect();

        let records: Vec<RawRecord> = directory
            .elements
            .iter()
            .map(|e| directory_record(e, &team_names, &position_names, &season))
            .collect();
        stats.records_parsed += records.len() as u64;
        self.consolidator_for(consolidators, Family::PlayerSeasons)
            .merge(records);

        let ids: Vec<u32> = if self.cfg.player_ids.is_empty() {
            directory.elements.iter().map(|e| e.id).collect()
        } else {
            self.cfg.player_ids.clone()
        };
        stats.jobs_total += ids.len() as u32;
        info!(players = ids.len(), "Fetching gameweek histories");

        let cancel = &self.cancel;
        let results: Vec<(u32, Option<fpl_client::Result<fpl_client::ElementSummary>>)> =
            stream::iter(ids.into_iter().map(|id| async move {
                if cancel.is_cancelled() {
                    return (id, None);
                }
                (id, Some(api.element_summary(id).await))
            }))
            .buffer_unordered(2)
            .collect()
            .await;

        for (id, result) in results {
            let spec = JobSpec {
                source: Source::OfficialApi,
                target: Target::PlayerHistory { player_id: id },
                priority: 0,
            };
            match result {
                None => {
                    stats.jobs_cancelled += 1;
                    manifest.record_cancelled(spec);
                }
                Some(Ok(summary)) => {
                    stats.jobs_succeeded += 1;
                    let Some((player, team)) = players.get(&id) else {
                        warn!(player_id = id, "History fetched for unknown player id");
                        continue;
                    };
                    let records: Vec<RawRecord> = summary
                        .history
                        .iter()
                        .map(|gw| history_record(gw, player, team, &team_names, &season))
                        .collect();
                    stats.records_parsed += records.len() as u64;
                    self.consolidator_for(consolidators, Family::PlayerMatches)
                        .merge(records);
                }
                Some(Err(e)) => {
                    warn!(player_id = id, error = %e, "History fetch failed");
                    stats.jobs_failed += 1;
                    manifest.record_failure(spec, e.to_string(), Vec::new());
                }
            }
        }
    }
}

fn directory_record(
    element: &Element,
    team_names: &HashMap<u32, String>,
    position_names: &HashMap<u32, String>,
    season: &str,
) -> RawRecord {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert(
        "player_id".to_string(),
        FieldValue::Num(f64::from(element.id)),
    );
    fields.insert(
        "position".to_string(),
        position_names
            .get(&element.element_type)
            .map(|p| FieldValue::Text(p.clone()))
            .unwrap_or(FieldValue::Missing),
    );
    fields.insert(
        "price".to_string(),
        FieldValue::Num(element.price_millions()),
    );

    RawRecord {
        source: Source::OfficialApi,
        entity: element.full_name(),
        team: team_names.get(&element.team).cloned().unwrap_or_default(),
        season: season.to_string(),
        scope: None,
        fields,
    }
}

fn history_record(
    gw: &GameweekHistory,
    player: &str,
    team: &str,
    team_names: &HashMap<u32, String>,
    season: &str,
) -> RawRecord {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("round".to_string(), FieldValue::Num(f64::from(gw.round)));
    fields.insert(
        "date".to_string(),
        gw.kickoff_time
            .clone()
            .map(FieldValue::Text)
            .unwrap_or(FieldValue::Missing),
    );
    fields.insert(
        "opponent".to_string(),
        team_names
            .get(&gw.opponent_team)
            .map(|t| FieldValue::Text(t.clone()))
            .unwrap_or(FieldValue::Missing),
    );
    fields.insert(
        "was_home".to_string(),
        FieldValue::Text((if gw.was_home { "home" } else { "away" }).to_string()),
    );
    fields.insert(
        "points".to_string(),
        FieldValue::Num(f64::from(gw.total_points)),
    );
    fields.insert("minutes".to_string(), FieldValue::Num(f64::from(gw.minutes)));
    fields.insert("goals".to_string(), FieldValue::Num(f64::from(gw.goals_scored)));
    fields.insert("assists".to_string(), FieldValue::Num(f64::from(gw.assists)));
    fields.insert(
        "clean_sheets".to_string(),
        FieldValue::Num(f64::from(gw.clean_sheets)),
    );
    fields.insert("bonus".to_string(), FieldValue::Num(f64::from(gw.bonus)));

    RawRecord {
        source: Source::OfficialApi,
        entity: player.to_string(),
        team: team.to_string(),
        season: season.to_string(),
        scope: Some(format!("gw{}", gw.round)),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_record_is_scoped_by_gameweek() {
        let gw = GameweekHistory {
            element: 7,
            round: 3,
            total_points: 9,
            minutes: 90,
            goals_scored: 1,
            assists: 1,
            clean_sheets: 0,
            bonus: 2,
            opponent_team: 2,
            was_home: true,
            kickoff_time: Some("2024-09-01T15:00:00Z".into()),
        };
        let team_names = HashMap::from([(2, "Aston Villa".to_string())]);
        let record = history_record(&gw, "Bukayo Saka", "Arsenal", &team_names, "2024-2025");

        assert_eq!(record.scope.as_deref(), Some("gw3"));
        assert_eq!(*record.field("points"), FieldValue::Num(9.0));
        assert_eq!(
            *record.field("opponent"),
            FieldValue::Text("Aston Villa".into())
        );
        assert_eq!(*record.field("was_home"), FieldValue::Text("home".into()));
    }

    #[test]
    fn directory_record_converts_price_from_tenths() {
        let element = Element {
            id: 7,
            first_name: "Bukayo".into(),
            second_name: "Saka".into(),
            web_name: "Saka".into(),
            team: 1,
            element_type: 3,
            now_cost: 102,
        };
        let team_names = HashMap::from([(1, "Arsenal".to_string())]);
        let position_names = HashMap::from([(3, "MID".to_string())]);
        let record = directory_record(&element, &team_names, &position_names, "2024-2025");

        assert_eq!(record.entity, "Bukayo Saka");
        assert_eq!(record.team, "Arsenal");
        assert_eq!(*record.field("price"), FieldValue::Num(10.2));
        assert_eq!(*record.field("position"), FieldValue::Text("MID".into()));
    }
}
