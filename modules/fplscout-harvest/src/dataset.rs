//! Per-family dataset persistence.
//!
//! Each family has a fixed column schema: the key columns, the provenance
//! column, then the family's canonical fields in a documented order. Absent
//! values are written as the `NA` sentinel, which is distinct from both `0`
//! and the empty string so downstream feature engineering can tell "no
//! data" from "zero".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use fplscout_common::types::{EntityKey, Family, FieldValue, Source};

use crate::consolidate::Consolidator;

/// Sentinel written for `FieldValue::Missing`.
pub const MISSING: &str = "NA";

/// Canonical field order per family. This is the dataset's public schema;
/// changing it is a breaking change for downstream consumers.
pub fn family_columns(family: Family) -> &'static [&'static str] {
    match family {
        Family::PlayerSeasons => &[
            "player_id",
            "position",
            "price",
            "minutes",
            "goals",
            "assists",
            "shots",
            "shots_on_target",
            "xg",
            "npxg",
            "xa",
            "sca",
            "gca",
            "touches_att_pen",
        ],
        Family::PlayerMatches => &[
            "round",
            "date",
            "opponent",
            "was_home",
            "points",
            "minutes",
            "goals",
            "assists",
            "clean_sheets",
            "bonus",
            "rating",
            "xg",
            "xa",
            "shots",
            "key_passes",
            "tackles",
            "clearances",
            "interceptions",
        ],
        Family::Fixtures => &[
            "wk",
            "date",
            "home",
            "away",
            "home_goals",
            "away_goals",
            "home_xg",
            "away_xg",
        ],
        Family::TeamMatches => &[
            "date",
            "comp",
            "venue",
            "result",
            "goals_for",
            "goals_against",
            "opponent",
            "xg",
            "xga",
        ],
    }
}

#[derive(Debug, Clone)]
pub struct DatasetRow {
    pub key: EntityKey,
    pub source: Source,
    pub fields: BTreeMap<String, FieldValue>,
}

/// The accumulated, deduplicated rows for one family, ordered by canonical
/// key. Replaced wholesale between runs: persistence always rewrites the
/// whole file.
#[derive(Debug)]
pub struct Dataset {
    pub family: Family,
    pub rows: Vec<DatasetRow>,
}

impl Dataset {
    pub fn from_consolidator(family: Family, consolidator: &Consolidator) -> Self {
        let rows = consolidator
            .rows()
            .map(|(key, row)| DatasetRow {
                key: key.clone(),
                source: row.source,
                fields: row.fields(),
            })
            .collect();
        Self { family, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> Vec<&str> {
        let mut header = vec!["entity", "team", "season", "scope", "source"];
        header.extend(family_columns(self.family));
        header
    }

    /// Write `{data_dir}/datasets/{family}.csv`, returning the path.
    pub fn write_csv(&self, data_dir: &Path) -> Result<PathBuf> {
        let dir = data_dir.join("datasets");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
        let path = dir.join(format!("{}.csv", self.family));

        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        writer.write_record(self.header())?;

        for row in &self.rows {
            let mut record = vec![
                row.key.entity.clone(),
                row.key.team.clone(),
                row.key.season.clone(),
                row.key.scope.clone().unwrap_or_else(|| MISSING.to_string()),
                row.source.to_string(),
            ];
            for column in family_columns(self.family) {
                record.push(csv_value(
                    row.fields.get(*column).unwrap_or(&FieldValue::Missing),
                ));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;

        info!(
            family = %self.family,
            rows = self.rows.len(),
            path = %path.display(),
            "Dataset written"
        );
        Ok(path)
    }
}

fn csv_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Num(n) => format!("{n}"),
        FieldValue::Missing => MISSING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::AliasTable;
    use fplscout_common::types::RawRecord;

    fn sample_dataset(dir: &Path) -> PathBuf {
        let mut c = Consolidator::new(vec![Source::StatsSite], AliasTable::empty());
        c.add(RawRecord {
            source: Source::StatsSite,
            entity: "Erling Haaland".into(),
            team: "Manchester City".into(),
            season: "2024-2025".into(),
            scope: None,
            fields: BTreeMap::from([
                ("goals".to_string(), FieldValue::Num(27.0)),
                ("minutes".to_string(), FieldValue::Missing),
                ("xg".to_string(), FieldValue::Num(25.4)),
            ]),
        });
        Dataset::from_consolidator(Family::PlayerSeasons, &c)
            .write_csv(dir)
            .expect("writes")
    }

    #[test]
    fn missing_sentinel_is_distinct_from_zero_and_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = sample_dataset(tmp.path());
        let contents = std::fs::read_to_string(path).expect("readable");

        let mut lines = contents.lines();
        let header = lines.next().expect("header row");
        assert!(header.starts_with("entity,team,season,scope,source,"));
        let row = lines.next().expect("data row");
        assert!(row.contains("erling haaland"));
        assert!(row.contains(",NA,"), "missing minutes should be NA, got: {row}");
        assert!(row.contains("27"));
        assert!(row.contains("25.4"));
    }

    #[test]
    fn header_order_is_stable() {
        let ds = Dataset {
            family: Family::Fixtures,
            rows: Vec::new(),
        };
        assert_eq!(
            ds.header(),
            vec![
                "entity", "team", "season", "scope", "source", "wk", "date", "home", "away",
                "home_goals", "away_goals", "home_xg", "away_xg"
            ]
        );
    }

    #[test]
    fn numbers_render_without_trailing_noise() {
        assert_eq!(csv_value(&FieldValue::Num(2.0)), "2");
        assert_eq!(csv_value(&FieldValue::Num(2.5)), "2.5");
        assert_eq!(csv_value(&FieldValue::Missing), "NA");
        assert_eq!(csv_value(&FieldValue::Text("W".into())), "W");
    }
}
