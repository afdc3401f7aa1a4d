use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::config::ColumnResolver;
use crate::error::Result;
use crate::table::Table;

/// Buildings the join matched to more than `threshold` distinct meter ids,
/// counted over every `(point, building)` candidate.
///
/// Point tables without a meter column yield no buildings. A meter name that
/// matches several columns is a configuration error.
pub fn multi_unit_buildings(
    points: &Table,
    meter: &str,
    candidates: &[(usize, usize)],
    threshold: usize,
) -> Result<HashSet<usize>> {
    let Some(meter) = ColumnResolver::new(points.headers()).resolve_optional(meter)? else {
        debug!("No meter column; multi-unit exclusion skipped");
        return Ok(HashSet::new());
    };

    let mut meters: BTreeMap<usize, BTreeSet<&str>> = BTreeMap::new();
    for &(point, building) in candidates {
        let id = points.value(point, meter);
        if !id.trim().is_empty() {
            meters.entry(building).or_default().insert(id);
        }
    }
    let excluded: HashSet<usize> = meters
        .into_iter()
        .filter(|(_, ids)| ids.len() > threshold)
        .map(|(building, _)| building)
        .collect();
    if !excluded.is_empty() {
        warn!(
            "Excluding {} buildings with more than {} meters",
            excluded.len(),
            threshold
        );
    }
    Ok(excluded)
}
