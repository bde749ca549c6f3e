//! Expands the caller's run configuration into the concrete job list and
//! builds the URL each scrape job fetches. Which seasons, teams, and
//! matches to pull is entirely the caller's decision; this module only
//! mechanizes it.

use fplscout_common::config::RunConfig;
use fplscout_common::error::FetchError;
use fplscout_common::types::{JobSpec, Source, Target};

/// Jobs that go through the scrape runner (stats site and match site).
pub fn scrape_jobs(cfg: &RunConfig) -> Vec<JobSpec> {
    let mut jobs = Vec::new();

    for season in &cfg.seasons {
        for table in &cfg.stat_tables {
            jobs.push(JobSpec {
                source: Source::StatsSite,
                target: Target::SeasonTable {
                    season: season.clone(),
                    table: table.clone(),
                },
                priority: 0,
            });
        }
        jobs.push(JobSpec {
            source: Source::StatsSite,
            target: Target::SeasonFixtures {
                season: season.clone(),
            },
            priority: 0,
        });
        for team in &cfg.teams {
            jobs.push(JobSpec {
                source: Source::StatsSite,
                target: Target::TeamSeasonLog {
                    team: team.name.clone(),
                    squad_id: team.squad_id.clone(),
                    season: season.clone(),
                },
                priority: 0,
            });
        }
    }

    for match_id in &cfg.match_ids {
        jobs.push(JobSpec {
            source: Source::MatchSite,
            target: Target::Match {
                match_id: match_id.clone(),
            },
            priority: 0,
        });
    }

    jobs
}

/// Jobs served by the API client. Histories for an empty `player_ids` list
/// are expanded at runtime from the fetched directory.
pub fn api_jobs(cfg: &RunConfig) -> Vec<JobSpec> {
    if !cfg.api_enabled {
        return Vec::new();
    }
    let mut jobs = vec![JobSpec {
        source: Source::OfficialApi,
        target: Target::PlayerDirectory,
        priority: 0,
    }];
    for player_id in &cfg.player_ids {
        jobs.push(JobSpec {
            source: Source::OfficialApi,
            target: Target::PlayerHistory {
                player_id: *player_id,
            },
            priority: 0,
        });
    }
    jobs
}

/// Build the URL a scrape job fetches. Team slugs come from the caller's
/// team registry; the stats site encodes them in the path.
pub fn scrape_url(spec: &JobSpec, cfg: &RunConfig) -> Result<String, FetchError> {
    match &spec.target {
        Target::SeasonTable { season, table } => {
            let site = cfg
                .stats_site
                .as_ref()
                .ok_or_else(|| FetchError::Config("stats_site not configured".into()))?;
            // Each stat table has its own page; the standard table lives on
            // the season's main stats page.
            let page = table.strip_prefix("stats_").unwrap_or(table);
            let page = if page == "standard" { "stats" } else { page };
            Ok(format!(
                "{}/en/comps/{}/{}/{}/{}-{}-Stats",
                site.base_url.trim_end_matches('/'),
                site.competition_id,
                season,
                page,
                season,
                site.competition_slug
            ))
        }
        Target::SeasonFixtures { season } => {
            let site = cfg
                .stats_site
                .as_ref()
                .ok_or_else(|| FetchError::Config("stats_site not configured".into()))?;
            Ok(format!(
                "{}/en/comps/{}/{}/schedule/{}-{}-Scores-and-Fixtures",
                site.base_url.trim_end_matches('/'),
                site.competition_id,
                season,
                season,
                site.competition_slug
            ))
        }
        Target::TeamSeasonLog {
            team,
            squad_id,
            season,
        } => {
            let site = cfg
                .stats_site
                .as_ref()
                .ok_or_else(|| FetchError::Config("stats_site not configured".into()))?;
            let slug = cfg
                .teams
                .iter()
                .find(|t| t.name == *team)
                .map(|t| t.slug.clone())
                .ok_or_else(|| FetchError::Config(format!("team {team} not in registry")))?;
            Ok(format!(
                "{}/en/squads/{}/{}/matchlogs/all_comps/schedule/{}-Scores-and-Fixtures-All-Competitions",
                site.base_url.trim_end_matches('/'),
                squad_id,
                season,
                slug
            ))
        }
        Target::Match { match_id } => {
            let site = cfg
                .match_site
                .as_ref()
                .ok_or_else(|| FetchError::Config("match_site not configured".into()))?;
            Ok(format!(
                "{}/match/{}",
                site.base_url.trim_end_matches('/'),
                match_id
            ))
        }
        Target::PlayerDirectory | Target::PlayerHistory { .. } => Err(FetchError::Config(
            "API targets are served by the API client, not the scraper".into(),
        )),
    }
}
