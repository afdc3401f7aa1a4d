//! Links a primary table to one secondary table on normalized address:
//! exact equality first, then n-gram cosine similarity for the leftovers.

pub mod fuzzy;
pub mod household;
pub mod summary;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use self::fuzzy::{grant_matches, rank_candidates, Candidate, FuzzyResult, NgramVectorizer};
use self::household::{add_start_month, is_household_pair, plan_household_links, registry_side, RowAggregator};
use self::summary::JoinRates;
use crate::config::{LinkageConfig, MergeBase};
use crate::constants::{SourceKind, ADDRESS, NORMALIZED_ADDRESS};
use crate::error::{Diagnostics, ErrorCode, LinkageError, Result, ResultExt};
use crate::observability::metrics;
use crate::pipeline::processing::normalize::{SourceTable, TableOrigin};
use crate::table::Table;

pub const FLAG_PREFIX: &str = "flag_";
pub const SIMILARITY_PREFIX: &str = "similarity_score_";
pub const PROVENANCE_PREFIX: &str = "matched_address_";

static TRAILING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\d+$").expect("label pattern"));

/// Label for a source file: its stem without a trailing `_<digits>`.
pub fn source_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    TRAILING_NUMBER.replace(&stem, "").into_owned()
}

/// Identity of one side of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSource {
    pub label: String,
    pub kind: Option<SourceKind>,
    pub origin: TableOrigin,
}

impl LinkSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: None,
            origin: TableOrigin::File,
        }
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// A table, the column holding its normalized address, and its source
#[derive(Debug, Clone)]
pub struct LinkTable {
    pub table: Table,
    pub key: String,
    pub source: LinkSource,
}

impl LinkTable {
    pub fn new(table: Table, key: impl Into<String>, source: LinkSource) -> Self {
        Self {
            table,
            key: key.into(),
            source,
        }
    }

    /// Wrap a cleaned source, keyed on its normalized address.
    pub fn from_source(source: SourceTable, label: impl Into<String>) -> Self {
        Self {
            key: NORMALIZED_ADDRESS.to_string(),
            source: LinkSource {
                label: label.into(),
                kind: Some(source.kind),
                origin: source.origin,
            },
            table: source.table,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkParams {
    pub ngram_size: usize,
    pub similarity_threshold: f64,
    pub batch_size: usize,
    pub household_threshold: usize,
    pub merge_base: MergeBase,
}

impl LinkParams {
    pub fn from_config(config: &LinkageConfig, merge_base: MergeBase) -> Self {
        Self {
            ngram_size: config.ngram_size,
            similarity_threshold: config.similarity_threshold,
            batch_size: config.batch_size,
            household_threshold: config.household_threshold,
            merge_base,
        }
    }
}

impl Default for LinkParams {
    fn default() -> Self {
        Self::from_config(&LinkageConfig::default(), MergeBase::Primary)
    }
}

/// How one primary row was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum RowLink {
    /// Removed before linking (crowded or ambiguous address)
    Dropped,
    Unmatched,
    /// Identical address; several rows are aggregated into one
    Exact(Vec<usize>),
    Fuzzy(Candidate),
}

#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub table: Table,
    pub rates: JoinRates,
    pub summary: String,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub fuzzy_attempted: bool,
}

pub struct RecordLinker {
    params: LinkParams,
}

impl RecordLinker {
    pub fn new(params: LinkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    /// Merge `secondary` into `primary`. Errors carry no partial output; the
    /// caller turns them into the stage failure.
    pub fn link(&self, primary: LinkTable, secondary: LinkTable, diag: &mut Diagnostics) -> Result<LinkOutcome> {
        let started = Instant::now();
        let (primary, secondary) = match self.params.merge_base {
            MergeBase::Primary => (primary, secondary),
            MergeBase::Secondary => (secondary, primary),
        };
        info!(
            "Linking {} ({} rows) with {} ({} rows)",
            primary.source.label,
            primary.table.len(),
            secondary.source.label,
            secondary.table.len()
        );
        let outcome = self.link_tables(primary, secondary).note(diag, ErrorCode::TextMatching)?;
        metrics::linkage::exact_matched(outcome.exact_matches);
        metrics::linkage::fuzzy_matched(outcome.fuzzy_matches);
        metrics::linkage::rates_recorded(outcome.rates.exact, outcome.rates.inclusive, outcome.rates.secondary);
        metrics::linkage::duration(started.elapsed().as_secs_f64());
        info!("{}", outcome.summary.replace('\n', "; "));
        Ok(outcome)
    }

    fn link_tables(&self, mut primary: LinkTable, mut secondary: LinkTable) -> Result<LinkOutcome> {
        if self.params.similarity_threshold.is_nan() || !(0.0..=1.0).contains(&self.params.similarity_threshold) {
            return Err(LinkageError::Config(format!(
                "similarity threshold {} is outside [0, 1]",
                self.params.similarity_threshold
            )));
        }
        let pkey = primary.table.require_column(&primary.key, &primary.source.label)?;
        let skey = secondary.table.require_column(&secondary.key, &secondary.source.label)?;

        let household = is_household_pair(primary.source.kind, secondary.source.kind);
        let (mut links, excluded) = if household {
            add_start_month(&mut primary.table)?;
            add_start_month(&mut secondary.table)?;
            let side = registry_side(
                (primary.source.kind, &primary.table),
                (secondary.source.kind, &secondary.table),
            )?;
            let plan = plan_household_links(
                &primary.table,
                pkey,
                &secondary.table,
                skey,
                side,
                self.params.household_threshold,
            )?;
            (plan.links, plan.excluded)
        } else {
            (exact_links(&primary.table, pkey, &secondary.table, skey), HashSet::new())
        };

        let mut best_scores: HashMap<usize, f64> = HashMap::new();
        let fuzzy_attempted = self.params.ngram_size > 0
            && self.fuzzy_stage(&primary.table, pkey, &secondary.table, skey, &excluded, &mut links, &mut best_scores);

        let exact_matches = links.iter().filter(|l| matches!(l, RowLink::Exact(_))).count();
        let fuzzy_matches = links.iter().filter(|l| matches!(l, RowLink::Fuzzy(_))).count();
        let secondary_exact: HashSet<usize> = links
            .iter()
            .filter_map(|l| match l {
                RowLink::Exact(rows) => Some(rows.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();
        let rates = JoinRates::compute(
            primary.table.len(),
            secondary.table.len(),
            exact_matches,
            fuzzy_matches,
            secondary_exact.len(),
        );

        let table = assemble(&primary, &secondary, skey, &links, &best_scores, fuzzy_attempted)?;
        Ok(LinkOutcome {
            table,
            summary: rates.to_string(),
            rates,
            exact_matches,
            fuzzy_matches,
            fuzzy_attempted,
        })
    }

    /// Returns whether similarity was computed at all.
    #[allow(clippy::too_many_arguments)]
    fn fuzzy_stage(
        &self,
        primary: &Table,
        pkey: usize,
        secondary: &Table,
        skey: usize,
        excluded: &HashSet<String>,
        links: &mut [RowLink],
        best_scores: &mut HashMap<usize, f64>,
    ) -> bool {
        let matched: HashSet<&str> = links
            .iter()
            .enumerate()
            .filter(|(_, l)| matches!(l, RowLink::Exact(_)))
            .map(|(p, _)| primary.value(p, pkey))
            .collect();

        let mut addresses: Vec<&str> = Vec::new();
        let mut address_slot: HashMap<&str, usize> = HashMap::new();
        for (p, link) in links.iter().enumerate() {
            let address = primary.value(p, pkey);
            if *link == RowLink::Unmatched && !address.is_empty() && !excluded.contains(address) {
                address_slot.entry(address).or_insert_with(|| {
                    addresses.push(address);
                    addresses.len() - 1
                });
            }
        }

        let mut pool: Vec<usize> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (s, row) in secondary.rows().iter().enumerate() {
            let address = row[skey].as_str();
            if address.is_empty() || matched.contains(address) || excluded.contains(address) {
                continue;
            }
            if seen.insert(address) {
                pool.push(s);
            }
        }

        if addresses.is_empty() || pool.is_empty() {
            debug!("Nothing left for similarity matching");
            return false;
        }

        let vectorizer = NgramVectorizer::fit(self.params.ngram_size, &addresses);
        debug!(
            "Fitted {}-gram vocabulary of {} terms on {} addresses",
            self.params.ngram_size,
            vectorizer.vocabulary_len(),
            addresses.len()
        );
        let primary_vectors: Vec<_> = addresses.iter().map(|a| vectorizer.transform(a)).collect();
        let pool_vectors: Vec<_> = pool
            .iter()
            .map(|&s| vectorizer.transform(secondary.value(s, skey)))
            .collect();
        let candidates = rank_candidates(
            &primary_vectors,
            &pool_vectors,
            1,
            self.params.batch_size,
        );
        let results = grant_matches(&candidates, self.params.similarity_threshold);

        for (p, link) in links.iter_mut().enumerate() {
            let slot = match address_slot.get(primary.value(p, pkey)) {
                Some(&slot) if *link == RowLink::Unmatched => slot,
                _ => continue,
            };
            match results[slot] {
                FuzzyResult::Granted(candidate) => {
                    metrics::linkage::similarity_recorded(candidate.score);
                    *link = RowLink::Fuzzy(Candidate {
                        secondary: pool[candidate.secondary],
                        score: candidate.score,
                    });
                }
                FuzzyResult::Unmatched { best_score: Some(score) } => {
                    best_scores.insert(p, score);
                }
                FuzzyResult::Unmatched { best_score: None } => {}
            }
        }
        true
    }
}

/// First secondary row per address, matched on exact equality.
fn exact_links(primary: &Table, pkey: usize, secondary: &Table, skey: usize) -> Vec<RowLink> {
    let mut first: HashMap<&str, usize> = HashMap::new();
    for (s, row) in secondary.rows().iter().enumerate() {
        if !row[skey].is_empty() {
            first.entry(row[skey].as_str()).or_insert(s);
        }
    }
    primary
        .rows()
        .iter()
        .map(|row| match first.get(row[pkey].as_str()) {
            Some(&s) if !row[pkey].is_empty() => RowLink::Exact(vec![s]),
            _ => RowLink::Unmatched,
        })
        .collect()
}

fn assemble(
    primary: &LinkTable,
    secondary: &LinkTable,
    skey: usize,
    links: &[RowLink],
    best_scores: &HashMap<usize, f64>,
    fuzzy_attempted: bool,
) -> Result<Table> {
    let label = &secondary.source.label;
    let synthetic = secondary.source.origin == TableOrigin::Synthetic;
    let primary_headers = primary.table.headers();
    let data_cols: Vec<usize> = (0..primary_headers.len())
        .filter(|&i| !primary_headers[i].starts_with(FLAG_PREFIX))
        .collect();
    let flag_cols: Vec<usize> = (0..primary_headers.len())
        .filter(|&i| primary_headers[i].starts_with(FLAG_PREFIX))
        .collect();
    let own_flag = format!("{}{}", FLAG_PREFIX, primary.source.label);
    let add_own_flag = !primary_headers.contains(&own_flag);

    let secondary_cols: Vec<usize> = (0..secondary.table.headers().len()).filter(|&i| i != skey).collect();
    let provenance_col = secondary.table.column_index(ADDRESS).unwrap_or(skey);
    let aggregator = if links.iter().any(|l| matches!(l, RowLink::Exact(rows) if rows.len() > 1)) {
        Some(RowAggregator::new(&secondary.table)?)
    } else {
        None
    };

    let mut headers: Vec<String> = data_cols.iter().map(|&i| primary_headers[i].clone()).collect();
    headers.extend(
        secondary_cols
            .iter()
            .map(|&i| format!("{}_{}", secondary.table.headers()[i], label)),
    );
    headers.push(format!("{}{}", PROVENANCE_PREFIX, label));
    if fuzzy_attempted {
        headers.push(format!("{}{}", SIMILARITY_PREFIX, label));
    }
    headers.extend(flag_cols.iter().map(|&i| primary_headers[i].clone()));
    if add_own_flag {
        headers.push(own_flag);
    }
    headers.push(format!("{}{}", FLAG_PREFIX, label));

    let mut out = Table::new(headers);
    for (p, link) in links.iter().enumerate() {
        let matched_row: Option<Vec<String>> = match link {
            RowLink::Dropped => continue,
            RowLink::Unmatched => None,
            RowLink::Exact(rows) if rows.len() == 1 => Some(secondary.table.rows()[rows[0]].clone()),
            RowLink::Exact(rows) => match &aggregator {
                Some(aggregator) => Some(aggregator.aggregate(&secondary.table, rows)),
                None => Some(secondary.table.rows()[rows[0]].clone()),
            },
            RowLink::Fuzzy(c) => Some(secondary.table.rows()[c.secondary].clone()),
        };
        let source_row = &primary.table.rows()[p];
        let mut row: Vec<String> = data_cols.iter().map(|&i| source_row[i].clone()).collect();
        match &matched_row {
            Some(values) => row.extend(secondary_cols.iter().map(|&i| values[i].clone())),
            None => row.extend(secondary_cols.iter().map(|_| String::new())),
        }
        row.push(
            matched_row
                .as_ref()
                .map(|values| values[provenance_col].clone())
                .unwrap_or_default(),
        );
        if fuzzy_attempted {
            let score = match link {
                RowLink::Fuzzy(c) => Some(c.score),
                RowLink::Unmatched => best_scores.get(&p).copied(),
                _ => None,
            };
            row.push(score.map(|s| format!("{:.6}", s)).unwrap_or_default());
        }
        row.extend(flag_cols.iter().map(|&i| source_row[i].clone()));
        if add_own_flag {
            row.push("1".to_string());
        }
        let present = matched_row.is_some() && !synthetic;
        row.push(if present { "1" } else { "0" }.to_string());
        out.push_row(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(addresses: &[&str], extra: &str) -> Table {
        Table::from_rows(
            vec!["id".into(), "addr".into()],
            addresses
                .iter()
                .enumerate()
                .map(|(i, a)| vec![format!("{}{}", extra, i + 1), a.to_string()])
                .collect(),
        )
    }

    fn params(ngram_size: usize, threshold: f64) -> LinkParams {
        LinkParams {
            ngram_size,
            similarity_threshold: threshold,
            ..LinkParams::default()
        }
    }

    fn column<'a>(table: &'a Table, name: &str) -> Vec<&'a str> {
        table.column_values(table.column_index(name).unwrap()).collect()
    }

    #[test]
    fn test_source_label() {
        assert_eq!(source_label(Path::new("in/water_status_2.csv")), "water_status");
        assert_eq!(source_label(Path::new("geocoding.csv")), "geocoding");
    }

    #[test]
    fn test_exact_match_has_flag_and_no_score() {
        let linker = RecordLinker::new(params(2, 0.9));
        let primary = LinkTable::new(keyed(&["本町1-1", "本町9-9"], "p"), "addr", LinkSource::new("main"));
        let secondary = LinkTable::new(keyed(&["本町1-1", "栄町5-5"], "s"), "addr", LinkSource::new("land"));
        let out = linker.link(primary, secondary, &mut Diagnostics::new()).unwrap();

        assert_eq!(column(&out.table, "flag_land"), vec!["1", "0"]);
        assert_eq!(column(&out.table, "id_land"), vec!["s1", ""]);
        assert_eq!(column(&out.table, "matched_address_land")[0], "本町1-1");
        assert_eq!(column(&out.table, "similarity_score_land")[0], "");
        assert_eq!(column(&out.table, "flag_main"), vec!["1", "1"]);
        assert_eq!(out.rates.exact, 50.0);
    }

    #[test]
    fn test_fuzzy_rows_may_share_a_secondary_row() {
        let linker = RecordLinker::new(params(2, 0.5));
        let primary = LinkTable::new(keyed(&["本町1-2-3A", "本町1-2-3B"], "p"), "addr", LinkSource::new("main"));
        let secondary = LinkTable::new(keyed(&["本町1-2-3"], "s"), "addr", LinkSource::new("land"));
        let out = linker.link(primary, secondary, &mut Diagnostics::new()).unwrap();

        assert_eq!(column(&out.table, "flag_land"), vec!["1", "1"]);
        assert_eq!(column(&out.table, "id_land"), vec!["s1", "s1"]);
        assert_eq!(out.fuzzy_matches, 2);
        assert_eq!(out.rates.inclusive, 100.0);
    }

    #[test]
    fn test_flags_are_last() {
        let linker = RecordLinker::new(params(0, 0.9));
        let primary = LinkTable::new(keyed(&["a"], "p"), "addr", LinkSource::new("main"));
        let secondary = LinkTable::new(keyed(&["a"], "s"), "addr", LinkSource::new("land"));
        let first = linker.link(primary, secondary, &mut Diagnostics::new()).unwrap();
        let third = LinkTable::new(keyed(&["a"], "v"), "addr", LinkSource::new("vacant"));
        let again = LinkTable::new(first.table, "addr", LinkSource::new("main"));
        let out = linker.link(again, third, &mut Diagnostics::new()).unwrap();
        let headers = out.table.headers();
        let n = headers.len();
        assert_eq!(&headers[n - 3..], &["flag_main", "flag_land", "flag_vacant"]);
        assert!(!out.fuzzy_attempted);
    }

    #[test]
    fn test_secondary_duplicates_do_not_duplicate_rows() {
        let linker = RecordLinker::new(params(2, 0.9));
        let primary = LinkTable::new(keyed(&["x1"], "p"), "addr", LinkSource::new("main"));
        let secondary = LinkTable::new(keyed(&["x1", "x1"], "s"), "addr", LinkSource::new("dup"));
        let out = linker.link(primary, secondary, &mut Diagnostics::new()).unwrap();
        assert_eq!(out.table.len(), 1);
        assert_eq!(column(&out.table, "id_dup"), vec!["s1"]);
        assert_eq!(out.rates.secondary, 50.0);
    }

    #[test]
    fn test_synthetic_secondary_is_never_present() {
        let linker = RecordLinker::new(params(2, 0.9));
        let primary = LinkTable::new(keyed(&["a1"], "p"), "addr", LinkSource::new("main"));
        let mut source = LinkSource::new("vacant_house");
        source.origin = TableOrigin::Synthetic;
        let secondary = LinkTable::new(keyed(&["a1"], "s"), "addr", source);
        let out = linker.link(primary, secondary, &mut Diagnostics::new()).unwrap();
        assert_eq!(column(&out.table, "flag_vacant_house"), vec!["0"]);
        assert_eq!(column(&out.table, "id_vacant_house"), vec!["s1"]);
    }

    #[test]
    fn test_merge_base_secondary_swaps_sides() {
        let linker = RecordLinker::new(LinkParams {
            merge_base: MergeBase::Secondary,
            ..params(0, 0.9)
        });
        let primary = LinkTable::new(keyed(&["a"], "p"), "addr", LinkSource::new("main"));
        let secondary = LinkTable::new(keyed(&["a", "b"], "s"), "addr", LinkSource::new("other"));
        let out = linker.link(primary, secondary, &mut Diagnostics::new()).unwrap();
        assert_eq!(out.table.len(), 2);
        assert!(out.table.has_column("flag_main"));
        assert!(out.table.has_column("flag_other"));
        assert_eq!(column(&out.table, "id_main"), vec!["p1", ""]);
    }

    #[test]
    fn test_missing_key_is_recorded() {
        let linker = RecordLinker::new(params(2, 0.9));
        let primary = LinkTable::new(keyed(&["a"], "p"), "nope", LinkSource::new("main"));
        let secondary = LinkTable::new(keyed(&["a"], "s"), "addr", LinkSource::new("land"));
        let mut diag = Diagnostics::new();
        assert!(linker.link(primary, secondary, &mut diag).is_err());
        assert_eq!(diag.code(), Some(ErrorCode::TextMatching));
    }
}
