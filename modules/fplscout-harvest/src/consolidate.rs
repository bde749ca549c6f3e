//! Canonical-key merge of raw records into per-family datasets.
//!
//! Entity names arrive in as many spellings as there are sources; every
//! name is folded (diacritics, punctuation, case), then passed through the
//! externally configured alias table before keys are compared. The merge
//! itself is a per-field fold by deterministic rank, so the result is
//! identical no matter what order jobs completed in.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, warn};

use fplscout_common::error::FetchError;
use fplscout_common::types::{EntityKey, FieldValue, RawRecord, Source};

// ---------------------------------------------------------------------------
// Name normalization
// ---------------------------------------------------------------------------

/// Fold common European diacritics and ligatures to plain ASCII. Applied
/// after lowercasing, so only lowercase forms are mapped.
fn fold_char(c: char) -> &'static str {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'í' | 'ì' | 'î' | 'ï' | 'ī' | 'į' => "i",
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' | 'ō' | 'ő' => "o",
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'ç' | 'ć' | 'č' => "c",
        'ñ' | 'ń' | 'ň' => "n",
        'š' | 'ś' | 'ş' | 'ș' => "s",
        'ž' | 'ź' | 'ż' => "z",
        'ð' | 'ď' | 'đ' => "d",
        'ł' => "l",
        'ř' => "r",
        'ť' | 'ţ' | 'ț' => "t",
        'ğ' => "g",
        'ß' => "ss",
        'æ' => "ae",
        'œ' => "oe",
        'þ' => "th",
        _ => "",
    }
}

/// Normalize a raw name for key comparison: drop the stats site's trailing
/// `\slug` artifact, lowercase, fold diacritics, strip punctuation, and
/// collapse whitespace.
pub fn normalize_name(raw: &str) -> String {
    let base = raw.split('\\').next().unwrap_or("");
    let mut out = String::with_capacity(base.len());
    for c in base.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if c.is_whitespace() || c.is_ascii_punctuation() {
            out.push(' ');
        } else {
            let folded = fold_char(c);
            if folded.is_empty() {
                out.push(' ');
            } else {
                out.push_str(folded);
            }
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Known spelling variants across sources, keyed and valued in normalized
/// form. Curated externally so new variants never require a code change.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    map: HashMap<String, String>,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(raw: HashMap<String, String>) -> Self {
        let map = raw
            .into_iter()
            .map(|(k, v)| (normalize_name(&k), normalize_name(&v)))
            .collect();
        Self { map }
    }

    /// Load from a JSON object file. A missing file is an empty table
    /// (alias curation lags source onboarding); malformed JSON is a
    /// configuration error.
    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Alias file not found, starting with empty table");
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(FetchError::Config(format!(
                    "cannot read alias file {}: {e}",
                    path.display()
                )))
            }
        };
        let map: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
            FetchError::Config(format!("invalid alias file {}: {e}", path.display()))
        })?;
        Ok(Self::from_map(map))
    }

    pub fn resolve(&self, normalized: &str) -> String {
        self.map
            .get(normalized)
            .cloned()
            .unwrap_or_else(|| normalized.to_string())
    }

    pub fn canonicalize(&self, raw: &str) -> String {
        self.resolve(&normalize_name(raw))
    }
}

pub fn canonical_key(record: &RawRecord, aliases: &AliasTable) -> EntityKey {
    EntityKey {
        entity: aliases.canonicalize(&record.entity),
        team: aliases.canonicalize(&record.team),
        season: record.season.trim().to_string(),
        scope: record
            .scope
            .as_ref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty()),
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Total order over records contributing to one key: source priority first,
/// then completeness, then a stable content digest. Lower ranks win. The
/// digest makes the order total, which is what keeps the merge independent
/// of job completion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    priority: usize,
    missing_fields: usize,
    digest: String,
}

#[derive(Debug)]
pub struct MergedRow {
    /// Source of the best-ranked contributor, for provenance.
    pub source: Source,
    best: Rank,
    fields: BTreeMap<String, (FieldValue, Rank)>,
}

impl MergedRow {
    pub fn fields(&self) -> BTreeMap<String, FieldValue> {
        self.fields
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect()
    }
}

pub struct Consolidator {
    priority: Vec<Source>,
    aliases: AliasTable,
    rows: BTreeMap<EntityKey, MergedRow>,
}

impl Consolidator {
    pub fn new(priority: Vec<Source>, aliases: AliasTable) -> Self {
        Self {
            priority,
            aliases,
            rows: BTreeMap::new(),
        }
    }

    fn rank(&self, record: &RawRecord) -> Rank {
        Rank {
            priority: self
                .priority
                .iter()
                .position(|s| *s == record.source)
                .unwrap_or(self.priority.len()),
            missing_fields: record.fields.values().filter(|v| v.is_missing()).count(),
            digest: serde_json::to_string(record).unwrap_or_default(),
        }
    }

    /// Merge one record. For a fresh key the record becomes the row; for a
    /// collision every present field is kept from the best-ranked record
    /// that supplies it, so higher-priority sources win field-by-field and
    /// lower-priority records fill the gaps they left.
    pub fn add(&mut self, record: RawRecord) {
        let key = canonical_key(&record, &self.aliases);
        let rank = self.rank(&record);
        let source = record.source;

        let row = self.rows.entry(key.clone()).or_insert_with(|| MergedRow {
            source,
            best: rank.clone(),
            fields: BTreeMap::new(),
        });

        if rank < row.best {
            if row.source != source {
                debug!(
                    entity = key.entity.as_str(),
                    season = key.season.as_str(),
                    kept = %source,
                    discarded = %row.source,
                    "Duplicate key: higher-priority record takes over"
                );
            }
            row.best = rank.clone();
            row.source = source;
        } else if rank != row.best {
            debug!(
                entity = key.entity.as_str(),
                season = key.season.as_str(),
                kept = %row.source,
                discarded = %source,
                "Duplicate key: merging lower-priority record for enrichment"
            );
        }

        for (name, value) in record.fields {
            if value.is_missing() {
                continue;
            }
            // Per-field min-by-rank fold; commutative, so job completion
            // order cannot change the outcome.
            let keep_existing = row
                .fields
                .get(&name)
                .is_some_and(|(_, existing_rank)| *existing_rank <= rank);
            if !keep_existing {
                row.fields.insert(name, (value, rank.clone()));
            }
        }
    }

    pub fn merge(&mut self, records: Vec<RawRecord>) {
        for record in records {
            self.add(record);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&EntityKey, &MergedRow)> {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    // --- normalize_name ---

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize_name("  Erling Haaland  "), "erling haaland");
    }

    #[test]
    fn normalize_folds_diacritics() {
        assert_eq!(normalize_name("Ødegaard"), "odegaard");
        assert_eq!(normalize_name("João Félix"), "joao felix");
        assert_eq!(normalize_name("Müller"), "muller");
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_name("J.Smith"), "j smith");
        assert_eq!(normalize_name("O'Brien"), "o brien");
        assert_eq!(normalize_name("Nott'ham Forest"), "nott ham forest");
    }

    #[test]
    fn normalize_drops_site_slug_artifact() {
        assert_eq!(normalize_name("Erling Haaland\\Erling-Haaland"), "erling haaland");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_name("Manchester   United"), "manchester united");
    }

    // --- alias table ---

    #[test]
    fn alias_resolution_applies_after_folding() {
        let aliases = AliasTable::from_map(HashMap::from([(
            "Manchester Utd".to_string(),
            "Manchester United".to_string(),
        )]));
        assert_eq!(aliases.canonicalize("Manchester Utd"), "manchester united");
        assert_eq!(aliases.canonicalize("MANCHESTER UTD"), "manchester united");
        assert_eq!(aliases.canonicalize("Leeds"), "leeds");
    }

    // --- merge ---

    fn record(
        source: Source,
        entity: &str,
        team: &str,
        fields: &[(&str, FieldValue)],
    ) -> RawRecord {
        RawRecord {
            source,
            entity: entity.to_string(),
            team: team.to_string(),
            season: "2024-2025".to_string(),
            scope: None,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn consolidator() -> Consolidator {
        Consolidator::new(
            vec![Source::StatsSite, Source::OfficialApi, Source::MatchSite],
            AliasTable::empty(),
        )
    }

    #[test]
    fn name_variants_merge_into_one_row() {
        let mut c = consolidator();
        c.add(record(
            Source::StatsSite,
            "João Félix",
            "Chelsea",
            &[("goals", FieldValue::Num(4.0))],
        ));
        c.add(record(
            Source::OfficialApi,
            "Joao Felix",
            "Chelsea",
            &[("price", FieldValue::Num(7.1))],
        ));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn higher_priority_source_wins_conflicting_fields() {
        let mut c = consolidator();
        c.add(record(
            Source::OfficialApi,
            "J.Smith",
            "TeamA",
            &[("goals", FieldValue::Num(3.0))],
        ));
        c.add(record(
            Source::StatsSite,
            "J.Smith",
            "TeamA",
            &[("goals", FieldValue::Num(4.0))],
        ));
        let (_, row) = c.rows().next().unwrap();
        assert_eq!(row.fields()["goals"], FieldValue::Num(4.0));
        assert_eq!(row.source, Source::StatsSite);
    }

    #[test]
    fn missing_fields_fill_from_lower_priority_record() {
        let mut c = consolidator();
        c.add(record(
            Source::StatsSite,
            "J.Smith",
            "TeamA",
            &[
                ("goals", FieldValue::Num(4.0)),
                ("minutes", FieldValue::Missing),
            ],
        ));
        c.add(record(
            Source::OfficialApi,
            "J.Smith",
            "TeamA",
            &[
                ("goals", FieldValue::Num(4.0)),
                ("minutes", FieldValue::Num(900.0)),
            ],
        ));
        assert_eq!(c.len(), 1);
        let (_, row) = c.rows().next().unwrap();
        assert_eq!(row.fields()["goals"], FieldValue::Num(4.0));
        assert_eq!(row.fields()["minutes"], FieldValue::Num(900.0));
        assert_eq!(row.source, Source::StatsSite);
    }

    #[test]
    fn merge_is_order_independent() {
        let a = record(Source::StatsSite, "A Player", "TeamA", &[("goals", FieldValue::Num(1.0))]);
        let b = record(
            Source::OfficialApi,
            "A Player",
            "TeamA",
            &[("goals", FieldValue::Num(2.0)), ("price", FieldValue::Num(5.5))],
        );
        let c = record(Source::MatchSite, "B Player", "TeamB", &[("rating", FieldValue::Num(7.0))]);

        let mut fwd = consolidator();
        fwd.merge(vec![a.clone(), b.clone(), c.clone()]);
        let mut rev = consolidator();
        rev.merge(vec![c, a, b]);

        let left: Vec<_> = fwd.rows().map(|(k, r)| (k.clone(), r.fields(), r.source)).collect();
        let right: Vec<_> = rev.rows().map(|(k, r)| (k.clone(), r.fields(), r.source)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn identical_record_remerge_is_idempotent() {
        let r = record(Source::StatsSite, "A Player", "TeamA", &[("goals", FieldValue::Num(1.0))]);
        let mut c = consolidator();
        c.add(r.clone());
        let before: Vec<_> = c.rows().map(|(k, row)| (k.clone(), row.fields())).collect();
        c.add(r);
        let after: Vec<_> = c.rows().map(|(k, row)| (k.clone(), row.fields())).collect();
        assert_eq!(before, after);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn same_source_duplicates_resolve_by_completeness() {
        // Two records from the same source, same key: the more complete one
        // wins regardless of arrival order.
        let sparse = record(
            Source::StatsSite,
            "A Player",
            "TeamA",
            &[("goals", FieldValue::Num(1.0)), ("minutes", FieldValue::Missing)],
        );
        let full = record(
            Source::StatsSite,
            "A Player",
            "TeamA",
            &[("goals", FieldValue::Num(2.0)), ("minutes", FieldValue::Num(90.0))],
        );

        let mut fwd = consolidator();
        fwd.merge(vec![sparse.clone(), full.clone()]);
        let mut rev = consolidator();
        rev.merge(vec![full, sparse]);

        for c in [&fwd, &rev] {
            let (_, row) = c.rows().next().unwrap();
            assert_eq!(row.fields()["goals"], FieldValue::Num(2.0));
            assert_eq!(row.fields()["minutes"], FieldValue::Num(90.0));
        }
    }

    #[test]
    fn different_scopes_stay_separate_rows() {
        let mut c = consolidator();
        let mut r1 = record(Source::OfficialApi, "A Player", "TeamA", &[("points", FieldValue::Num(6.0))]);
        r1.scope = Some("gw1".to_string());
        let mut r2 = record(Source::OfficialApi, "A Player", "TeamA", &[("points", FieldValue::Num(2.0))]);
        r2.scope = Some("gw2".to_string());
        c.merge(vec![r1, r2]);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn unknown_source_ranks_below_configured_priority() {
        let mut c = Consolidator::new(vec![Source::StatsSite], AliasTable::empty());
        c.add(record(Source::OfficialApi, "A Player", "TeamA", &[("goals", FieldValue::Num(9.0))]));
        c.add(record(Source::StatsSite, "A Player", "TeamA", &[("goals", FieldValue::Num(1.0))]));
        let (_, row) = c.rows().next().unwrap();
        assert_eq!(row.fields()["goals"], FieldValue::Num(1.0));
    }

    #[test]
    fn fields_map_is_deterministic() {
        let mut c = consolidator();
        c.add(record(
            Source::StatsSite,
            "A Player",
            "TeamA",
            &[("b", FieldValue::Num(1.0)), ("a", FieldValue::Num(2.0))],
        ));
        let (_, row) = c.rows().next().unwrap();
        let keys: Vec<_> = row.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        let _: BTreeMap<String, FieldValue> = row.fields();
    }
}
