//! Metric catalogue for the linkage pipeline
//!
//! Names follow Prometheus conventions. Nothing here installs an exporter:
//! without a registered recorder every call is a no-op.

use std::fmt;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Normalize metrics
    NormalizeRowsCleaned,
    NormalizeRowsDropped,
    NormalizeSyntheticSources,

    // Linkage metrics
    LinkageExactMatches,
    LinkageFuzzyMatches,
    LinkageSimilarityScore,
    LinkageExactRate,
    LinkageInclusiveRate,
    LinkageSecondaryRate,
    LinkageDuration,

    // Spatial metrics
    SpatialBuildingsDiscarded,
    SpatialPointsDropped,
    SpatialMultiUnitExcluded,
    SpatialJoinRatio,
    SpatialDuration,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::NormalizeRowsCleaned => "residence_link_normalize_rows_cleaned_total",
            MetricName::NormalizeRowsDropped => "residence_link_normalize_rows_dropped_total",
            MetricName::NormalizeSyntheticSources => "residence_link_normalize_synthetic_sources_total",

            MetricName::LinkageExactMatches => "residence_link_linkage_exact_matches_total",
            MetricName::LinkageFuzzyMatches => "residence_link_linkage_fuzzy_matches_total",
            MetricName::LinkageSimilarityScore => "residence_link_linkage_similarity_score",
            MetricName::LinkageExactRate => "residence_link_linkage_exact_rate_percent",
            MetricName::LinkageInclusiveRate => "residence_link_linkage_inclusive_rate_percent",
            MetricName::LinkageSecondaryRate => "residence_link_linkage_secondary_rate_percent",
            MetricName::LinkageDuration => "residence_link_linkage_duration_seconds",

            MetricName::SpatialBuildingsDiscarded => "residence_link_spatial_buildings_discarded_total",
            MetricName::SpatialPointsDropped => "residence_link_spatial_points_dropped_total",
            MetricName::SpatialMultiUnitExcluded => "residence_link_spatial_multi_unit_excluded_total",
            MetricName::SpatialJoinRatio => "residence_link_spatial_join_ratio_percent",
            MetricName::SpatialDuration => "residence_link_spatial_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            NormalizeRowsCleaned,
            NormalizeRowsDropped,
            NormalizeSyntheticSources,
            LinkageExactMatches,
            LinkageFuzzyMatches,
            LinkageSimilarityScore,
            LinkageExactRate,
            LinkageInclusiveRate,
            LinkageSecondaryRate,
            LinkageDuration,
            SpatialBuildingsDiscarded,
            SpatialPointsDropped,
            SpatialMultiUnitExcluded,
            SpatialJoinRatio,
            SpatialDuration,
        ]
        .into_iter()
    }

    /// (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::NormalizeRowsCleaned => ("normalize", "Rows kept after cleaning"),
            MetricName::NormalizeRowsDropped => ("normalize", "Rows dropped for a missing address"),
            MetricName::NormalizeSyntheticSources => ("normalize", "Absent sources replaced by defaults"),

            MetricName::LinkageExactMatches => ("linkage", "Primary rows matched on identical addresses"),
            MetricName::LinkageFuzzyMatches => ("linkage", "Primary rows matched by n-gram similarity"),
            MetricName::LinkageSimilarityScore => ("linkage", "Similarity of granted fuzzy matches"),
            MetricName::LinkageExactRate => ("linkage", "Exact match rate of the last link"),
            MetricName::LinkageInclusiveRate => ("linkage", "Exact plus fuzzy match rate of the last link"),
            MetricName::LinkageSecondaryRate => ("linkage", "Secondary exact match rate of the last link"),
            MetricName::LinkageDuration => ("linkage", "Link duration"),

            MetricName::SpatialBuildingsDiscarded => ("spatial", "Buildings above the area ceiling"),
            MetricName::SpatialPointsDropped => ("spatial", "Points that lost every building they matched"),
            MetricName::SpatialMultiUnitExcluded => ("spatial", "Buildings excluded as multi-unit housing"),
            MetricName::SpatialJoinRatio => ("spatial", "Share of points assigned to a building"),
            MetricName::SpatialDuration => ("spatial", "Assignment duration"),
        }
    }

    fn is_histogram(&self) -> bool {
        matches!(
            self,
            MetricName::LinkageSimilarityScore | MetricName::LinkageDuration | MetricName::SpatialDuration
        )
    }

    fn is_gauge(&self) -> bool {
        self.as_str().ends_with("_percent")
    }
}

/// Register descriptions with whatever recorder is installed.
pub fn describe_all() {
    for metric in MetricName::all_metrics() {
        let (_, description) = metric.metadata();
        if metric.is_histogram() {
            ::metrics::describe_histogram!(metric.as_str(), description);
        } else if metric.is_gauge() {
            ::metrics::describe_gauge!(metric.as_str(), description);
        } else {
            ::metrics::describe_counter!(metric.as_str(), description);
        }
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn rows_cleaned(source: &str, kept: usize, dropped: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsCleaned.as_str(), "source" => source.to_string())
            .increment(kept as u64);
        ::metrics::counter!(MetricName::NormalizeRowsDropped.as_str(), "source" => source.to_string())
            .increment(dropped as u64);
    }

    pub fn synthetic_source(source: &str) {
        ::metrics::counter!(MetricName::NormalizeSyntheticSources.as_str(), "source" => source.to_string())
            .increment(1);
    }
}

// ============================================================================
// Linkage Metrics
// ============================================================================

pub mod linkage {
    use super::MetricName;

    pub fn exact_matched(count: usize) {
        ::metrics::counter!(MetricName::LinkageExactMatches.as_str()).increment(count as u64);
    }

    pub fn fuzzy_matched(count: usize) {
        ::metrics::counter!(MetricName::LinkageFuzzyMatches.as_str()).increment(count as u64);
    }

    pub fn similarity_recorded(score: f64) {
        ::metrics::histogram!(MetricName::LinkageSimilarityScore.as_str()).record(score);
    }

    pub fn rates_recorded(exact: f64, inclusive: f64, secondary: f64) {
        ::metrics::gauge!(MetricName::LinkageExactRate.as_str()).set(exact);
        ::metrics::gauge!(MetricName::LinkageInclusiveRate.as_str()).set(inclusive);
        ::metrics::gauge!(MetricName::LinkageSecondaryRate.as_str()).set(secondary);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::LinkageDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Spatial Metrics
// ============================================================================

pub mod spatial {
    use super::MetricName;

    pub fn buildings_discarded(count: usize) {
        ::metrics::counter!(MetricName::SpatialBuildingsDiscarded.as_str()).increment(count as u64);
    }

    pub fn points_dropped(count: usize) {
        ::metrics::counter!(MetricName::SpatialPointsDropped.as_str()).increment(count as u64);
    }

    pub fn multi_unit_excluded(count: usize) {
        ::metrics::counter!(MetricName::SpatialMultiUnitExcluded.as_str()).increment(count as u64);
    }

    pub fn join_ratio(percent: f64) {
        ::metrics::gauge!(MetricName::SpatialJoinRatio.as_str()).set(percent);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::SpatialDuration.as_str()).record(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let names: HashSet<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), MetricName::all_metrics().count());
        assert!(names.iter().all(|n| n.starts_with("residence_link_")));
    }

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        describe_all();
        linkage::exact_matched(3);
        spatial::join_ratio(50.0);
        normalize::rows_cleaned("water_status", 10, 1);
    }
}
