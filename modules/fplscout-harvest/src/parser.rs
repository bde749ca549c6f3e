//! Source-specific page parsers, dispatched by source at job-dispatch time.
//!
//! All parsers share the same tolerance rules: multi-level headers are
//! flattened with a `_` separator and mapped through a synonym table,
//! columns the schema expects but the page lacks become explicit `Missing`
//! values (zero is a valid stat and must never stand in for absence), and
//! unknown extra columns are ignored. Parsing is deterministic: the same
//! content always yields the same records.

use std::collections::BTreeMap;

use scraper::{CaseSensitivity, ElementRef, Html, Selector};

use fplscout_common::error::FetchError;
use fplscout_common::types::{FieldValue, RawRecord, Source, Target};

/// Canonical column names with the flattened-header synonyms that map to
/// them, per table shape.
type ColumnSpec = &'static [(&'static str, &'static [&'static str])];

const PLAYER_TABLE_COLUMNS: ColumnSpec = &[
    ("position", &["pos"]),
    ("minutes", &["playing time_min", "min"]),
    ("goals", &["performance_gls", "gls"]),
    ("assists", &["performance_ast", "ast"]),
    ("shots", &["standard_sh", "shooting_sh", "sh"]),
    ("shots_on_target", &["standard_sot", "sot"]),
    ("xg", &["expected_xg", "xg"]),
    ("npxg", &["expected_npxg", "npxg"]),
    ("xa", &["expected_xag", "expected_xa", "xag", "xa"]),
    ("sca", &["sca_sca", "sca"]),
    ("gca", &["sca_gca", "gca"]),
    ("touches_att_pen", &["touches_att pen", "att pen"]),
];

const TEAM_LOG_COLUMNS: ColumnSpec = &[
    ("date", &["date"]),
    ("comp", &["comp"]),
    ("venue", &["venue"]),
    ("result", &["result"]),
    ("goals_for", &["gf"]),
    ("goals_against", &["ga"]),
    ("opponent", &["opponent"]),
    ("xg", &["xg"]),
    ("xga", &["xga"]),
];

const MATCH_COLUMNS: ColumnSpec = &[
    ("rating", &["rating"]),
    ("minutes", &["min", "minutes"]),
    ("xg", &["xg"]),
    ("xa", &["xa"]),
    ("shots", &["shots", "sh"]),
    ("key_passes", &["key passes", "kp"]),
    ("tackles", &["tackles", "tkl"]),
    ("clearances", &["clearances", "clr"]),
    ("interceptions", &["interceptions", "int"]),
];

pub fn parse(source: Source, target: &Target, html: &str) -> Result<Vec<RawRecord>, FetchError> {
    match (source, target) {
        (Source::StatsSite, Target::SeasonTable { season, table }) => {
            parse_season_table(html, season, table)
        }
        (Source::StatsSite, Target::SeasonFixtures { season }) => parse_fixtures(html, season),
        (Source::StatsSite, Target::TeamSeasonLog { team, season, .. }) => {
            parse_team_log(html, team, season)
        }
        (Source::MatchSite, Target::Match { match_id }) => parse_match_page(html, match_id),
        _ => Err(FetchError::Config(format!(
            "no parser for source {source} with target {target}"
        ))),
    }
}

/// The stats site ships some tables inside HTML comments so they escape
/// naive scrapers. Strip the comment markers and parse what is inside.
fn unwrap_comments(html: &str) -> String {
    let re = regex::Regex::new(r"(?s)<!--(.*?)-->").expect("valid regex");
    re.replace_all(html, "$1").into_owned()
}

fn cell_text(cell: ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Empty cell → explicit Missing. Numeric content (commas and a trailing
/// percent sign tolerated) → Num. Anything else → Text.
fn cell_value(text: &str) -> FieldValue {
    let t = text.trim();
    if t.is_empty() {
        return FieldValue::Missing;
    }
    let numeric = t.replace(',', "");
    let numeric = numeric.trim_end_matches('%');
    match numeric.parse::<f64>() {
        Ok(n) => FieldValue::Num(n),
        Err(_) => FieldValue::Text(t.to_string()),
    }
}

/// Flatten the header rows of a table into one lowercase name per column.
/// Two-row headers join the (colspan-expanded) group row with the stat row
/// using `_`; ungrouped columns keep the bare stat name.
fn flatten_headers(table: ElementRef) -> Result<Vec<String>, FetchError> {
    let tr_sel = Selector::parse("thead tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");

    let rows: Vec<ElementRef> = table.select(&tr_sel).collect();
    let Some(stat_row) = rows.last() else {
        return Err(FetchError::ParseAnomaly("table has no header rows".into()));
    };

    let stats: Vec<String> = stat_row
        .select(&cell_sel)
        .map(|c| cell_text(c).to_lowercase())
        .collect();
    if rows.len() < 2 {
        return Ok(stats);
    }

    let mut groups: Vec<String> = Vec::new();
    for cell in rows[0].select(&cell_sel) {
        let span: usize = cell
            .value()
            .attr("colspan")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let text = cell_text(cell).to_lowercase();
        for _ in 0..span {
            groups.push(text.clone());
        }
    }

    Ok(stats
        .into_iter()
        .enumerate()
        .map(|(i, stat)| match groups.get(i) {
            Some(group) if !group.is_empty() => format!("{group}_{stat}"),
            _ => stat,
        })
        .collect())
}

fn find_column(headers: &[String], synonyms: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| synonyms.iter().any(|s| *s == h.as_str()))
}

/// Resolve each canonical column to its index in this particular table, or
/// None when the page dropped it.
fn resolve_columns(headers: &[String], spec: ColumnSpec) -> Vec<(&'static str, Option<usize>)> {
    spec.iter()
        .map(|(canonical, synonyms)| (*canonical, find_column(headers, synonyms)))
        .collect()
}

fn row_fields(
    cells: &[String],
    columns: &[(&'static str, Option<usize>)],
) -> BTreeMap<String, FieldValue> {
    columns
        .iter()
        .map(|(canonical, idx)| {
            let value = idx
                .and_then(|i| cells.get(i))
                .map(|text| cell_value(text))
                .unwrap_or(FieldValue::Missing);
            (canonical.to_string(), value)
        })
        .collect()
}

fn find_table<'a>(doc: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    for raw in selectors {
        let sel = Selector::parse(raw).expect("valid selector");
        if let Some(table) = doc.select(&sel).next() {
            return Some(table);
        }
    }
    None
}

fn data_rows<'a>(table: &ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let row_sel = Selector::parse("tbody tr").expect("valid selector");
    table
        .select(&row_sel)
        // Repeated mid-table header rows carry the `thead` class.
        .filter(|r| !r.value().has_class("thead", CaseSensitivity::AsciiCaseInsensitive))
        .collect()
}

fn parse_season_table(html: &str, season: &str, table_id: &str) -> Result<Vec<RawRecord>, FetchError> {
    let unwrapped = unwrap_comments(html);
    let doc = Html::parse_document(&unwrapped);

    let sel = Selector::parse(&format!("table#{table_id}"))
        .map_err(|_| FetchError::Config(format!("invalid table id {table_id}")))?;
    let table = doc
        .select(&sel)
        .next()
        .ok_or_else(|| FetchError::ParseAnomaly(format!("table {table_id} absent")))?;

    let headers = flatten_headers(table)?;
    let player_col = find_column(&headers, &["player"])
        .ok_or_else(|| FetchError::ParseAnomaly(format!("player column absent in {table_id}")))?;
    let squad_col = find_column(&headers, &["squad", "team"]);
    let columns = resolve_columns(&headers, PLAYER_TABLE_COLUMNS);

    let cell_sel = Selector::parse("th, td").expect("valid selector");
    let mut records = Vec::new();
    for row in data_rows(&table) {
        let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
        let entity = cells.get(player_col).cloned().unwrap_or_default();
        if entity.is_empty() || entity == "Player" {
            continue;
        }
        let team = squad_col
            .and_then(|i| cells.get(i))
            .cloned()
            .unwrap_or_default();
        records.push(RawRecord {
            source: Source::StatsSite,
            entity,
            team,
            season: season.to_string(),
            scope: None,
            fields: row_fields(&cells, &columns),
        });
    }

    if records.is_empty() {
        return Err(FetchError::ParseAnomaly(format!("no data rows in {table_id}")));
    }
    Ok(records)
}

fn parse_fixtures(html: &str, season: &str) -> Result<Vec<RawRecord>, FetchError> {
    let unwrapped = unwrap_comments(html);
    let doc = Html::parse_document(&unwrapped);

    let table = find_table(&doc, &["table[id^=\"sched\"]", "table.stats_table"])
        .ok_or_else(|| FetchError::ParseAnomaly("fixture table absent".into()))?;

    let headers = flatten_headers(table)?;
    let wk_col = find_column(&headers, &["wk"])
        .ok_or_else(|| FetchError::ParseAnomaly("fixture week column absent".into()))?;
    let home_col = find_column(&headers, &["home"])
        .ok_or_else(|| FetchError::ParseAnomaly("home column absent".into()))?;
    let away_col = find_column(&headers, &["away"])
        .ok_or_else(|| FetchError::ParseAnomaly("away column absent".into()))?;
    let date_col = find_column(&headers, &["date"]);
    let score_col = find_column(&headers, &["score"]);

    // The fixture table repeats "xg" for home and away; first is home, last
    // is away.
    let xg_cols: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.as_str() == "xg")
        .map(|(i, _)| i)
        .collect();
    let home_xg_col = xg_cols.first().copied();
    let away_xg_col = xg_cols.last().copied().filter(|c| Some(*c) != home_xg_col);

    let score_re = regex::Regex::new(r"^\s*(\d+)\s*[–—-]\s*(\d+)\s*$").expect("valid regex");

    let cell_sel = Selector::parse("th, td").expect("valid selector");
    let mut records = Vec::new();
    for row in data_rows(&table) {
        let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
        // Spacer and repeated-header rows have a non-numeric week cell.
        let wk = match cells.get(wk_col).map(|c| cell_value(c)) {
            Some(FieldValue::Num(n)) => n,
            _ => continue,
        };
        let home = cells.get(home_col).cloned().unwrap_or_default();
        let away = cells.get(away_col).cloned().unwrap_or_default();
        if home.is_empty() || away.is_empty() {
            continue;
        }

        // Completed fixtures carry "2–1"; future ones are blank and stay
        // Missing rather than becoming 0-0.
        let (home_goals, away_goals) = match score_col.and_then(|i| cells.get(i)) {
            Some(score) => match score_re.captures(score) {
                Some(caps) => (cell_value(&caps[1]), cell_value(&caps[2])),
                None => (FieldValue::Missing, FieldValue::Missing),
            },
            None => (FieldValue::Missing, FieldValue::Missing),
        };

        let cell_at = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .map(|t| cell_value(t))
                .unwrap_or(FieldValue::Missing)
        };

        let mut fields = BTreeMap::new();
        fields.insert("wk".to_string(), FieldValue::Num(wk));
        fields.insert("date".to_string(), cell_at(date_col));
        fields.insert("home".to_string(), FieldValue::Text(home.clone()));
        fields.insert("away".to_string(), FieldValue::Text(away.clone()));
        fields.insert("home_goals".to_string(), home_goals);
        fields.insert("away_goals".to_string(), away_goals);
        fields.insert("home_xg".to_string(), cell_at(home_xg_col));
        fields.insert("away_xg".to_string(), cell_at(away_xg_col));

        records.push(RawRecord {
            source: Source::StatsSite,
            entity: format!("{home} v {away}"),
            team: home,
            season: season.to_string(),
            scope: Some(format!("wk{wk}")),
            fields,
        });
    }

    if records.is_empty() {
        return Err(FetchError::ParseAnomaly("no fixture rows".into()));
    }
    Ok(records)
}

fn parse_team_log(html: &str, team: &str, season: &str) -> Result<Vec<RawRecord>, FetchError> {
    let unwrapped = unwrap_comments(html);
    let doc = Html::parse_document(&unwrapped);

    let table = find_table(&doc, &["table[id^=\"matchlogs\"]", "table.stats_table"])
        .ok_or_else(|| FetchError::ParseAnomaly("match log table absent".into()))?;

    let headers = flatten_headers(table)?;
    let date_col = find_column(&headers, &["date"])
        .ok_or_else(|| FetchError::ParseAnomaly("date column absent in match log".into()))?;
    let columns = resolve_columns(&headers, TEAM_LOG_COLUMNS);

    let cell_sel = Selector::parse("th, td").expect("valid selector");
    let mut records = Vec::new();
    for row in data_rows(&table) {
        let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
        let date = cells.get(date_col).cloned().unwrap_or_default();
        if date.is_empty() || date == "Date" {
            continue;
        }
        records.push(RawRecord {
            source: Source::StatsSite,
            entity: team.to_string(),
            team: team.to_string(),
            season: season.to_string(),
            scope: Some(date),
            fields: row_fields(&cells, &columns),
        });
    }

    if records.is_empty() {
        return Err(FetchError::ParseAnomaly("no match log rows".into()));
    }
    Ok(records)
}

fn parse_match_page(html: &str, match_id: &str) -> Result<Vec<RawRecord>, FetchError> {
    let doc = Html::parse_document(html);

    let table = find_table(&doc, &["table#player_stats", "table.stats_table", "table"])
        .ok_or_else(|| FetchError::ParseAnomaly("player stats table absent".into()))?;

    let headers = flatten_headers(table)?;
    let player_col = find_column(&headers, &["player"])
        .ok_or_else(|| FetchError::ParseAnomaly("player column absent in match page".into()))?;
    let team_col = find_column(&headers, &["team", "squad"]);
    let columns = resolve_columns(&headers, MATCH_COLUMNS);

    let cell_sel = Selector::parse("th, td").expect("valid selector");
    let mut records = Vec::new();
    for row in data_rows(&table) {
        let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
        let entity = cells.get(player_col).cloned().unwrap_or_default();
        if entity.is_empty() || entity == "Player" {
            continue;
        }
        let team = team_col
            .and_then(|i| cells.get(i))
            .cloned()
            .unwrap_or_default();
        records.push(RawRecord {
            source: Source::MatchSite,
            entity,
            team,
            season: String::new(),
            scope: Some(match_id.to_string()),
            fields: row_fields(&cells, &columns),
        });
    }

    if records.is_empty() {
        return Err(FetchError::ParseAnomaly("no player rows in match page".into()));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEASON_TABLE: &str = r#"
<html><body>
<div id="div_stats_standard"><!--
<table id="stats_standard">
<thead>
<tr><th></th><th></th><th></th><th colspan="3">Performance</th><th colspan="2">Expected</th></tr>
<tr><th>Rk</th><th>Player</th><th>Squad</th><th>Gls</th><th>Ast</th><th>PK</th><th>xG</th><th>npxG</th></tr>
</thead>
<tbody>
<tr><td>1</td><td>Erling Haaland</td><td>Manchester City</td><td>27</td><td>5</td><td>7</td><td>25.4</td><td>19.8</td></tr>
<tr class="thead"><td>Rk</td><td>Player</td><td>Squad</td><td>Gls</td><td>Ast</td><td>PK</td><td>xG</td><td>npxG</td></tr>
<tr><td>2</td><td>Mohamed Salah</td><td>Liverpool</td><td>18</td><td>10</td><td>3</td><td></td><td>15.1</td></tr>
</tbody>
</table>
--></div>
</body></html>
"#;

    fn season_target() -> Target {
        Target::SeasonTable {
            season: "2024-2025".into(),
            table: "stats_standard".into(),
        }
    }

    #[test]
    fn commented_table_with_multilevel_headers_parses() {
        let records = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        assert_eq!(records.len(), 2);

        let haaland = &records[0];
        assert_eq!(haaland.entity, "Erling Haaland");
        assert_eq!(haaland.team, "Manchester City");
        assert_eq!(haaland.season, "2024-2025");
        assert_eq!(*haaland.field("goals"), FieldValue::Num(27.0));
        assert_eq!(*haaland.field("assists"), FieldValue::Num(5.0));
        assert_eq!(*haaland.field("xg"), FieldValue::Num(25.4));
        assert_eq!(*haaland.field("npxg"), FieldValue::Num(19.8));
    }

    #[test]
    fn repeated_header_rows_are_skipped() {
        let records = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        assert!(records.iter().all(|r| r.entity != "Player"));
    }

    #[test]
    fn empty_cells_become_missing_not_zero() {
        let records = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        let salah = &records[1];
        assert_eq!(*salah.field("xg"), FieldValue::Missing);
        assert_eq!(*salah.field("npxg"), FieldValue::Num(15.1));
    }

    #[test]
    fn absent_schema_columns_become_missing() {
        let records = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        // The sample table has no minutes column at all.
        assert_eq!(*records[0].field("minutes"), FieldValue::Missing);
    }

    #[test]
    fn unknown_extra_columns_are_ignored() {
        let records = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        // "PK" is not part of the schema and must not leak in.
        assert!(!records[0].fields.contains_key("performance_pk"));
        assert!(!records[0].fields.contains_key("pk"));
    }

    #[test]
    fn parsing_is_deterministic() {
        let a = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        let b = parse(Source::StatsSite, &season_target(), SEASON_TABLE).expect("parses");
        assert_eq!(a, b);
    }

    #[test]
    fn absent_table_is_a_parse_anomaly() {
        let err = parse(Source::StatsSite, &season_target(), "<html><body></body></html>")
            .unwrap_err();
        assert!(matches!(err, FetchError::ParseAnomaly(_)));
    }

    #[test]
    fn table_with_no_data_rows_is_a_parse_anomaly() {
        let html = r#"<table id="stats_standard"><thead><tr><th>Player</th></tr></thead><tbody></tbody></table>"#;
        let err = parse(Source::StatsSite, &season_target(), html).unwrap_err();
        assert!(matches!(err, FetchError::ParseAnomaly(_)));
    }

    const FIXTURES: &str = r#"
<table id="sched_2024-2025_9_1" class="stats_table">
<thead>
<tr><th>Wk</th><th>Date</th><th>Home</th><th>xG</th><th>Score</th><th>xG</th><th>Away</th></tr>
</thead>
<tbody>
<tr><td>1</td><td>2024-08-17</td><td>Arsenal</td><td>2.3</td><td>2&#8211;0</td><td>0.4</td><td>Wolves</td></tr>
<tr><td></td><td></td><td></td><td></td><td></td><td></td><td></td></tr>
<tr><td>38</td><td>2025-05-25</td><td>Liverpool</td><td></td><td></td><td></td><td>Chelsea</td></tr>
</tbody>
</table>
"#;

    #[test]
    fn fixtures_split_scores_and_keep_future_games_missing() {
        let target = Target::SeasonFixtures { season: "2024-2025".into() };
        let records = parse(Source::StatsSite, &target, FIXTURES).expect("parses");
        assert_eq!(records.len(), 2);

        let played = &records[0];
        assert_eq!(played.entity, "Arsenal v Wolves");
        assert_eq!(played.scope.as_deref(), Some("wk1"));
        assert_eq!(*played.field("home_goals"), FieldValue::Num(2.0));
        assert_eq!(*played.field("away_goals"), FieldValue::Num(0.0));
        assert_eq!(*played.field("home_xg"), FieldValue::Num(2.3));
        assert_eq!(*played.field("away_xg"), FieldValue::Num(0.4));

        let future = &records[1];
        assert_eq!(*future.field("home_goals"), FieldValue::Missing);
        assert_eq!(*future.field("away_goals"), FieldValue::Missing);
        assert_eq!(*future.field("home_xg"), FieldValue::Missing);
    }

    const TEAM_LOG: &str = r#"
<table id="matchlogs_for" class="stats_table">
<thead>
<tr><th>Date</th><th>Comp</th><th>Venue</th><th>Result</th><th>GF</th><th>GA</th><th>Opponent</th><th>xG</th><th>xGA</th></tr>
</thead>
<tbody>
<tr><td>2024-08-17</td><td>Premier League</td><td>Home</td><td>W</td><td>2</td><td>0</td><td>Wolves</td><td>2.3</td><td>0.4</td></tr>
<tr><td>2024-08-24</td><td>Premier League</td><td>Away</td><td>D</td><td>1</td><td>1</td><td>Brighton</td><td>1.1</td><td>1.4</td></tr>
</tbody>
</table>
"#;

    #[test]
    fn team_log_rows_are_scoped_by_date() {
        let target = Target::TeamSeasonLog {
            team: "Arsenal".into(),
            squad_id: "18bb7c10".into(),
            season: "2024-2025".into(),
        };
        let records = parse(Source::StatsSite, &target, TEAM_LOG).expect("parses");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity, "Arsenal");
        assert_eq!(records[0].scope.as_deref(), Some("2024-08-17"));
        assert_eq!(*records[0].field("goals_for"), FieldValue::Num(2.0));
        assert_eq!(*records[1].field("xga"), FieldValue::Num(1.4));
    }

    const MATCH_PAGE: &str = r#"
<table id="player_stats">
<thead>
<tr><th>Player</th><th>Team</th><th>Rating</th><th>xG</th><th>xA</th><th>Shots</th><th>Key Passes</th><th>Tackles</th></tr>
</thead>
<tbody>
<tr><td>Bukayo Saka</td><td>Arsenal</td><td>8.1</td><td>0.7</td><td>0.4</td><td>4</td><td>3</td><td>1</td></tr>
</tbody>
</table>
"#;

    #[test]
    fn match_page_rows_are_scoped_by_match_id() {
        let target = Target::Match { match_id: "m1234".into() };
        let records = parse(Source::MatchSite, &target, MATCH_PAGE).expect("parses");
        assert_eq!(records.len(), 1);
        let saka = &records[0];
        assert_eq!(saka.entity, "Bukayo Saka");
        assert_eq!(saka.scope.as_deref(), Some("m1234"));
        assert_eq!(*saka.field("rating"), FieldValue::Num(8.1));
        assert_eq!(*saka.field("key_passes"), FieldValue::Num(3.0));
        // Columns the page lacks are explicit Missing.
        assert_eq!(*saka.field("clearances"), FieldValue::Missing);
    }
}
