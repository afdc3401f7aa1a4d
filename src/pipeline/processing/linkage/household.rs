//! Resident registry against water status: crowded-address removal,
//! start-month alignment and usage aggregation.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::RowLink;
use crate::config::ColumnResolver;
use crate::constants::{
    SourceKind, ADDRESS, CLOSED_FLAG, HOUSEHOLD_CODE, MAX_USAGE, MEAN_USAGE, METER_NUMBER,
    MIN_USAGE, MOVE_DATE, REGISTRATION_DATE, START_MONTH, TOTAL_USAGE, USAGE_CHANGE_RATE,
    USAGE_END_DATE, USAGE_START_DATE,
};
use crate::error::Result;
use crate::pipeline::processing::normalize::dates::start_month;
use crate::table::Table;

/// Date columns, in preference order, that seed the start month
const START_MONTH_SOURCES: [&str; 3] = [USAGE_START_DATE, MOVE_DATE, REGISTRATION_DATE];

pub fn is_household_pair(a: Option<SourceKind>, b: Option<SourceKind>) -> bool {
    matches!(
        (a, b),
        (Some(SourceKind::ResidentRegistry), Some(SourceKind::WaterStatus))
            | (Some(SourceKind::WaterStatus), Some(SourceKind::ResidentRegistry))
    )
}

/// Add `start_month` (YYYY-MM) from the first date column the table carries.
pub fn add_start_month(table: &mut Table) -> Result<()> {
    let values = match START_MONTH_SOURCES
        .iter()
        .find_map(|name| table.column_index(name))
    {
        Some(col) => table
            .column_values(col)
            .map(|v| start_month(v).unwrap_or_default())
            .collect(),
        None => {
            warn!("No date column to derive {} from; leaving it empty", START_MONTH);
            vec![String::new(); table.len()]
        }
    };
    table.set_column(START_MONTH, values)
}

/// Per-row links for the household path plus the addresses removed from
/// fuzzy matching on both sides.
#[derive(Debug)]
pub struct HouseholdPlan {
    pub links: Vec<RowLink>,
    pub excluded: HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum RegistrySide {
    Primary(usize),
    Secondary(usize),
}

/// Addresses that `threshold` or more distinct household codes share.
fn crowded_addresses(table: &Table, key: usize, household: usize, threshold: usize) -> HashSet<String> {
    let mut codes: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in table.rows() {
        if !row[key].is_empty() {
            codes.entry(row[key].as_str()).or_default().insert(row[household].as_str());
        }
    }
    codes
        .into_iter()
        .filter(|(_, c)| c.len() >= threshold)
        .map(|(address, _)| address.to_string())
        .collect()
}

fn rows_by_address(table: &Table, key: usize, skip: &HashSet<String>) -> Vec<(String, Vec<usize>)> {
    let mut order: Vec<(String, Vec<usize>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        let address = row[key].as_str();
        if address.is_empty() || skip.contains(address) {
            continue;
        }
        match index.get(address) {
            Some(&slot) => order[slot].1.push(i),
            None => {
                index.insert(address, order.len());
                order.push((address.to_string(), vec![i]));
            }
        }
    }
    order
}

/// Pair primary rows with secondary rows on address, using start month to
/// split addresses shared by several primary rows.
pub fn plan_household_links(
    primary: &Table,
    pkey: usize,
    secondary: &Table,
    skey: usize,
    registry: RegistrySide,
    threshold: usize,
) -> Result<HouseholdPlan> {
    let mut excluded = match registry {
        RegistrySide::Primary(col) => crowded_addresses(primary, pkey, col, threshold),
        RegistrySide::Secondary(col) => crowded_addresses(secondary, skey, col, threshold),
    };
    if !excluded.is_empty() {
        warn!(
            "Dropping {} addresses shared by {} or more households",
            excluded.len(),
            threshold
        );
    }

    let pmonth = primary.require_column(START_MONTH, "primary")?;
    let smonth = secondary.require_column(START_MONTH, "secondary")?;
    let secondary_groups: HashMap<String, Vec<usize>> =
        rows_by_address(secondary, skey, &excluded).into_iter().collect();

    let mut links: Vec<RowLink> = primary
        .rows()
        .iter()
        .map(|row| {
            if excluded.contains(&row[pkey]) {
                RowLink::Dropped
            } else {
                RowLink::Unmatched
            }
        })
        .collect();

    for (address, rows) in rows_by_address(primary, pkey, &excluded) {
        let candidates = secondary_groups.get(&address).map(Vec::as_slice).unwrap_or(&[]);
        if candidates.is_empty() {
            continue;
        }
        if rows.len() == 1 {
            links[rows[0]] = RowLink::Exact(candidates.to_vec());
            continue;
        }
        match candidates.len() {
            1 => {
                // most recent primary row takes the only candidate
                let latest = rows
                    .iter()
                    .copied()
                    .max_by(|a, b| primary.value(*a, pmonth).cmp(primary.value(*b, pmonth)).then(a.cmp(b)))
                    .unwrap_or(rows[0]);
                for &r in &rows {
                    links[r] = if r == latest {
                        RowLink::Exact(candidates.to_vec())
                    } else {
                        RowLink::Dropped
                    };
                }
            }
            n if n < threshold => {
                for &r in &rows {
                    let month = primary.value(r, pmonth);
                    let aligned: Vec<usize> = candidates
                        .iter()
                        .copied()
                        .filter(|&s| !month.is_empty() && secondary.value(s, smonth) == month)
                        .collect();
                    links[r] = if aligned.is_empty() {
                        RowLink::Dropped
                    } else {
                        RowLink::Exact(aligned)
                    };
                }
            }
            n => {
                debug!("Excluding {} with {} shared meters", address, n);
                for &r in &rows {
                    links[r] = RowLink::Dropped;
                }
                excluded.insert(address);
            }
        }
    }
    Ok(HouseholdPlan { links, excluded })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    First,
    Mode,
    Max,
    Min,
    Mean,
    Sum,
}

const AGGREGATES: [(&str, Aggregate); 11] = [
    (METER_NUMBER, Aggregate::First),
    (ADDRESS, Aggregate::Mode),
    (USAGE_START_DATE, Aggregate::Max),
    (USAGE_END_DATE, Aggregate::Max),
    (CLOSED_FLAG, Aggregate::Max),
    (MAX_USAGE, Aggregate::Max),
    (MEAN_USAGE, Aggregate::Mean),
    (MIN_USAGE, Aggregate::Min),
    (TOTAL_USAGE, Aggregate::Sum),
    (USAGE_CHANGE_RATE, Aggregate::Mean),
    (START_MONTH, Aggregate::Min),
];

/// Collapses several secondary rows into one representative row.
pub struct RowAggregator {
    rules: Vec<Aggregate>,
}

impl RowAggregator {
    pub fn new(table: &Table) -> Result<Self> {
        let resolver = ColumnResolver::new(table.headers());
        let mut rules = vec![Aggregate::First; table.headers().len()];
        for (name, rule) in AGGREGATES {
            if let Some(col) = resolver.resolve_optional(name)? {
                rules[col] = rule;
            }
        }
        Ok(Self { rules })
    }

    pub fn aggregate(&self, table: &Table, rows: &[usize]) -> Vec<String> {
        self.rules
            .iter()
            .enumerate()
            .map(|(col, rule)| {
                let values: Vec<&str> = rows
                    .iter()
                    .map(|&r| table.value(r, col))
                    .filter(|v| !v.trim().is_empty())
                    .collect();
                apply(*rule, &values)
            })
            .collect()
    }
}

fn numbers(values: &[&str]) -> Option<Vec<f64>> {
    values.iter().map(|v| v.trim().parse::<f64>().ok()).collect()
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn apply(rule: Aggregate, values: &[&str]) -> String {
    let first = || values.first().map(|v| v.to_string()).unwrap_or_default();
    if values.is_empty() {
        return String::new();
    }
    match rule {
        Aggregate::First => first(),
        Aggregate::Mode => {
            let mut counts: Vec<(&str, usize)> = Vec::new();
            for v in values {
                match counts.iter_mut().find(|(seen, _)| seen == v) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((v, 1)),
                }
            }
            let top = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
            counts
                .into_iter()
                .find(|(_, c)| *c == top)
                .map(|(v, _)| v.to_string())
                .unwrap_or_default()
        }
        Aggregate::Max | Aggregate::Min => match numbers(values) {
            Some(nums) => {
                let pick = if rule == Aggregate::Max { f64::max } else { f64::min };
                let init = if rule == Aggregate::Max { f64::NEG_INFINITY } else { f64::INFINITY };
                format_number(nums.into_iter().fold(init, pick))
            }
            None => {
                let chosen = if rule == Aggregate::Max {
                    values.iter().max()
                } else {
                    values.iter().min()
                };
                chosen.map(|v| v.to_string()).unwrap_or_default()
            }
        },
        Aggregate::Mean | Aggregate::Sum => match numbers(values) {
            Some(nums) => {
                let total: f64 = nums.iter().sum();
                if rule == Aggregate::Sum {
                    format_number(total)
                } else {
                    format_number(total / nums.len() as f64)
                }
            }
            None => first(),
        },
    }
}

/// Registry side of the pair, if either table is the resident registry.
pub fn registry_side(
    primary: (Option<SourceKind>, &Table),
    secondary: (Option<SourceKind>, &Table),
) -> Result<RegistrySide> {
    if primary.0 == Some(SourceKind::ResidentRegistry) {
        Ok(RegistrySide::Primary(primary.1.require_column(HOUSEHOLD_CODE, "resident_registry")?))
    } else {
        Ok(RegistrySide::Secondary(
            secondary.1.require_column(HOUSEHOLD_CODE, "resident_registry")?,
        ))
    }
}
