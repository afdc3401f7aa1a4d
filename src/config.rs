use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::SourceKind;
use crate::error::{LinkageError, Result};
use crate::table::Table;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "RESIDENCE_LINK_CONFIG";

/// Immutable per-run configuration, built once and passed to every stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub linkage: LinkageConfig,
    #[serde(default)]
    pub spatial: SpatialConfig,
    /// Keyed by source kind name (`water_status`, `resident_registry`, ...)
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Prefecture name used to pick the plane rectangular zone
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub municipality: String,
    /// Zone used when the region is not in the catalogue; unset makes that fatal
    #[serde(default)]
    pub default_zone: Option<u8>,
    #[serde(default)]
    pub merge_base: MergeBase,
    #[serde(default)]
    pub keep_work_dir: bool,
    /// JSON-lines file receiving job status events
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

fn default_work_root() -> PathBuf {
    PathBuf::from("work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            output_dir: default_output_dir(),
            region: String::new(),
            municipality: String::new(),
            default_zone: None,
            merge_base: MergeBase::default(),
            keep_work_dir: false,
            status_file: None,
        }
    }
}

/// Which side of a link supplies the row key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeBase {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkageConfig {
    /// Character n-gram size; 0 disables fuzzy matching
    pub ngram_size: usize,
    pub similarity_threshold: f64,
    /// Primary rows per similarity batch
    pub batch_size: usize,
    /// Distinct household codes at one address that mark it ambiguous
    pub household_threshold: usize,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            ngram_size: 2,
            similarity_threshold: 0.95,
            batch_size: 1000,
            household_threshold: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMethod {
    #[default]
    Intersects,
    Nearest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingDataType {
    #[default]
    Generic,
    Plateau,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub join_method: JoinMethod,
    pub buffer_multiplier: f64,
    /// Buildings at or above this footprint area are treated as non-residential
    pub max_building_area: f64,
    /// Buildings with more distinct meters than this are dropped as multi-unit
    pub multi_unit_threshold: usize,
    pub data_type: BuildingDataType,
    pub building_id_column: Option<String>,
    pub geometry_column: String,
    pub latitude_column: String,
    pub longitude_column: String,
    pub meter_column: String,
    pub areal_code_column: String,
    pub areal_name_column: String,
    /// Building footprints (.zip, .shp, .gpkg, .geojson or .csv with WKT)
    pub buildings: Option<PathBuf>,
    /// Areal-unit polygons carrying the code and name columns
    pub areal_units: Option<PathBuf>,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            join_method: JoinMethod::default(),
            buffer_multiplier: 2.0,
            max_building_area: 10_000.0,
            multi_unit_threshold: 2,
            data_type: BuildingDataType::default(),
            building_id_column: None,
            geometry_column: "geometry".to_string(),
            latitude_column: "lat_geocoding".to_string(),
            longitude_column: "lon_geocoding".to_string(),
            meter_column: "meter_number".to_string(),
            areal_code_column: "KEY_CODE".to_string(),
            areal_name_column: "S_NAME".to_string(),
            buildings: None,
            areal_units: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Logical field name -> column name in the input file
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

impl RunConfig {
    /// Load from `RESIDENCE_LINK_CONFIG` or `config.toml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LinkageError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let linkage = &self.linkage;
        if !(0.0..=1.0).contains(&linkage.similarity_threshold) {
            return Err(LinkageError::Config(format!(
                "similarity_threshold must lie in [0, 1], got {}",
                linkage.similarity_threshold
            )));
        }
        if linkage.batch_size == 0 {
            return Err(LinkageError::Config("batch_size must be positive".into()));
        }
        if linkage.household_threshold < 2 {
            return Err(LinkageError::Config(
                "household_threshold must be at least 2".into(),
            ));
        }

        let spatial = &self.spatial;
        if spatial.buffer_multiplier <= 0.0 {
            return Err(LinkageError::Config("buffer_multiplier must be positive".into()));
        }
        if spatial.max_building_area <= 0.0 {
            return Err(LinkageError::Config("max_building_area must be positive".into()));
        }
        if let Some(zone) = self.run.default_zone {
            if !(1..=19).contains(&zone) {
                return Err(LinkageError::Config(format!(
                    "default_zone must be between 1 and 19, got {}",
                    zone
                )));
            }
        }

        for name in self.sources.keys() {
            let kind: SourceKind = name.parse()?;
            self.field_map(kind)?;
        }
        Ok(())
    }

    pub fn source(&self, kind: SourceKind) -> Option<&SourceConfig> {
        self.sources.get(kind.as_str())
    }

    /// Validated logical-to-actual column mapping for `kind`.
    pub fn field_map(&self, kind: SourceKind) -> Result<FieldMap> {
        let empty = BTreeMap::new();
        let columns = self.source(kind).map(|s| &s.columns).unwrap_or(&empty);
        FieldMap::new(kind, columns)
    }
}

/// Mapping from canonical field names to the headers of one input file.
///
/// Fields without an explicit entry are expected under their canonical name.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    kind: SourceKind,
    pairs: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new(kind: SourceKind, columns: &BTreeMap<String, String>) -> Result<Self> {
        let known = kind.canonical_fields();
        if let Some(unknown) = columns.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(LinkageError::Config(format!(
                "source {} has no logical field '{}' (expected one of {})",
                kind,
                unknown,
                known.join(", ")
            )));
        }
        let pairs = known
            .iter()
            .map(|field| {
                let actual = columns
                    .get(*field)
                    .cloned()
                    .unwrap_or_else(|| field.to_string());
                (field.to_string(), actual)
            })
            .collect();
        Ok(Self { kind, pairs })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Rename mapped columns to canonical names and verify none are missing.
    pub fn apply(&self, table: &mut Table) -> Result<()> {
        let mut renames = Vec::new();
        let mut missing = Vec::new();
        {
            let resolver = ColumnResolver::new(table.headers());
            for (canonical, actual) in &self.pairs {
                match resolver.resolve_optional(actual)? {
                    Some(idx) => renames.push((idx, canonical.clone())),
                    None => missing.push(canonical.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(LinkageError::Schema(format!(
                "source {} is missing columns after renaming: {}",
                self.kind,
                missing.join(", ")
            )));
        }
        let headers: Vec<String> = table.headers().to_vec();
        for (idx, canonical) in renames {
            table.rename_column(&headers[idx], &canonical);
        }
        Ok(())
    }
}

/// Resolves a logical column name against actual headers: exact match first,
/// then a unique substring match.
pub struct ColumnResolver<'a> {
    headers: &'a [String],
}

impl<'a> ColumnResolver<'a> {
    pub fn new(headers: &'a [String]) -> Self {
        Self { headers }
    }

    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.resolve_optional(name)?.ok_or_else(|| {
            LinkageError::Schema(format!("no column matches '{}'", name))
        })
    }

    /// `Ok(None)` when nothing matches; ambiguous substring matches are an error.
    pub fn resolve_optional(&self, name: &str) -> Result<Option<usize>> {
        if let Some(idx) = self.headers.iter().position(|h| h == name) {
            return Ok(Some(idx));
        }
        let candidates: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.contains(name))
            .map(|(i, _)| i)
            .collect();
        match candidates.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => Err(LinkageError::Config(format!(
                "column '{}' is ambiguous: {}",
                name,
                many.iter()
                    .map(|&i| self.headers[i].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_without_sections() {
        let config = RunConfig::from_toml("").unwrap();
        assert_eq!(config.linkage.ngram_size, 2);
        assert_eq!(config.linkage.batch_size, 1000);
        assert_eq!(config.spatial.join_method, JoinMethod::Intersects);
        assert_eq!(config.spatial.multi_unit_threshold, 2);
        assert_eq!(config.run.merge_base, MergeBase::Primary);
    }

    #[test]
    fn test_parse_full_config() {
        let config = RunConfig::from_toml(
            r#"
            [run]
            region = "東京都"
            municipality = "千代田区"
            default_zone = 9

            [linkage]
            similarity_threshold = 0.8

            [spatial]
            join_method = "nearest"
            data_type = "plateau"

            [sources.water_status]
            path = "water.csv"
            columns = { meter_number = "水道番号", address = "住所" }
            "#,
        )
        .unwrap();
        assert_eq!(config.spatial.join_method, JoinMethod::Nearest);
        assert_eq!(config.spatial.data_type, BuildingDataType::Plateau);
        assert_eq!(config.linkage.similarity_threshold, 0.8);
        let source = config.source(SourceKind::WaterStatus).unwrap();
        assert_eq!(source.path.as_deref(), Some(Path::new("water.csv")));
    }

    #[test]
    fn test_rejects_bad_threshold_and_unknown_fields() {
        assert!(RunConfig::from_toml("[linkage]\nsimilarity_threshold = 1.5").is_err());
        assert!(RunConfig::from_toml("[linkage]\nbatch_size = 0").is_err());
        let err = RunConfig::from_toml(
            "[sources.vacant_house]\ncolumns = { meter_number = \"x\" }",
        )
        .unwrap_err();
        assert!(matches!(err, LinkageError::Config(_)));
        assert!(RunConfig::from_toml("[sources.unknown]").is_err());
    }

    #[test]
    fn test_resolver_exact_then_unique_substring() {
        let h = headers(&["meter_number", "meter_number_water_usage", "address_geocoding"]);
        let resolver = ColumnResolver::new(&h);
        assert_eq!(resolver.resolve("meter_number").unwrap(), 0);
        assert_eq!(resolver.resolve("address").unwrap(), 2);
        assert!(resolver.resolve_optional("structure").unwrap().is_none());
    }

    #[test]
    fn test_resolver_rejects_ambiguous_substring() {
        let h = headers(&["lat_geocoding", "lat_survey"]);
        let err = ColumnResolver::new(&h).resolve("lat").unwrap_err();
        assert!(matches!(err, LinkageError::Config(_)));
    }

    #[test]
    fn test_field_map_renames_and_reports_missing() {
        let mut columns = BTreeMap::new();
        columns.insert("address".to_string(), "所在地".to_string());
        let map = FieldMap::new(SourceKind::VacantHouse, &columns).unwrap();
        let mut table = Table::new(headers(&["調査番号", "所在地"]));
        map.apply(&mut table).unwrap();
        assert_eq!(table.headers()[1], "address");

        let map = FieldMap::new(SourceKind::Geocoding, &BTreeMap::new()).unwrap();
        let mut table = Table::new(headers(&["address", "lat"]));
        let err = map.apply(&mut table).unwrap_err();
        assert!(err.to_string().contains("geocoding"));
        assert!(err.to_string().contains("lon"));
    }
}
