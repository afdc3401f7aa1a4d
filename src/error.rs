use std::fmt;
use thiserror::Error;

/// Coarse classification used when reporting a failure upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    Encoding,
    Schema,
    DataQuality,
    Geometry,
    Config,
    Io,
}

#[derive(Error, Debug)]
pub enum LinkageError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("GeoPackage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),
}

impl LinkageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkageError::Format(_) | LinkageError::Csv(_) | LinkageError::Json(_) => {
                ErrorKind::Format
            }
            LinkageError::Encoding(_) => ErrorKind::Encoding,
            LinkageError::Schema(_) => ErrorKind::Schema,
            LinkageError::DataQuality(_) => ErrorKind::DataQuality,
            LinkageError::Geometry(_) | LinkageError::Shapefile(_) => ErrorKind::Geometry,
            LinkageError::Config(_) | LinkageError::Toml(_) => ErrorKind::Config,
            LinkageError::Io(_) | LinkageError::Sqlite(_) | LinkageError::Zip(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkageError>;

/// Diagnostic codes reported to the job collaborator when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Cleaning / normalization
    Cleaning,
    CreateDataProcessed,
    ImportFormat,
    FileLoading,
    Encoding,
    SourceSchema,
    DateFormat,

    // Record linkage
    TextMatching,
    LinkFileLoading,
    LinkImportFormat,
    LinkEncoding,

    // Spatial assignment
    SpatialJoin,
    ConvertWkt,
    AllowedExtension,
    GeometryColumns,
    SpatialEncoding,
    BuildingId,
    MergeBuildings,
    AddKeyCode,
    DataFormat,
    MergeGeometry,
    CsvGeometry,
    BuildingPolygonData,
    ArealUnitData,
    CoordinateSystem,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Cleaning => "e012_err_cleaning",
            ErrorCode::CreateDataProcessed => "e012_err_create_data_processed",
            ErrorCode::ImportFormat => "e012_err_import_format",
            ErrorCode::FileLoading => "e012_err_file_loading",
            ErrorCode::Encoding => "e012_err_encoding",
            ErrorCode::SourceSchema => "e012_err_source_schema",
            ErrorCode::DateFormat => "e012_err_date_format",
            ErrorCode::TextMatching => "e014_err_text_matching",
            ErrorCode::LinkFileLoading => "e014_err_file_loading",
            ErrorCode::LinkImportFormat => "e014_err_import_format",
            ErrorCode::LinkEncoding => "e014_err_encoding",
            ErrorCode::SpatialJoin => "e016_err_spatial_join",
            ErrorCode::ConvertWkt => "e016_err_convert_wkt",
            ErrorCode::AllowedExtension => "e016_err_allow_ext",
            ErrorCode::GeometryColumns => "e016_err_geometry",
            ErrorCode::SpatialEncoding => "e016_err_encoding",
            ErrorCode::BuildingId => "e016_err_building_id",
            ErrorCode::MergeBuildings => "e016_err_merge_building_and_textmatchedresult",
            ErrorCode::AddKeyCode => "e016_err_add_keycode",
            ErrorCode::DataFormat => "e016_err_data_format",
            ErrorCode::MergeGeometry => "e016_err_merge_geometry_failure",
            ErrorCode::CsvGeometry => "e016_err_csv_geometry",
            ErrorCode::BuildingPolygonData => "e016_err_data_building_polygon",
            ErrorCode::ArealUnitData => "e016_err_data_gpkg",
            ErrorCode::CoordinateSystem => "e016_err_coordinate_system",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Cleaning => "data cleaning failed",
            ErrorCode::CreateDataProcessed => "failed to write cleaned data",
            ErrorCode::ImportFormat => "unsupported input file format",
            ErrorCode::FileLoading => "failed to load input file",
            ErrorCode::Encoding => "input file encoding could not be decoded",
            ErrorCode::SourceSchema => "input columns do not match the configured mapping",
            ErrorCode::DateFormat => "date values could not be converted",
            ErrorCode::TextMatching => "text matching failed",
            ErrorCode::LinkFileLoading => "failed to load linkage input",
            ErrorCode::LinkImportFormat => "unsupported linkage input format",
            ErrorCode::LinkEncoding => "linkage input encoding could not be decoded",
            ErrorCode::SpatialJoin => "spatial join failed; check geometries for defects",
            ErrorCode::ConvertWkt => "geometry text is not valid WKT",
            ErrorCode::AllowedExtension => "geometry file extension is not supported",
            ErrorCode::GeometryColumns => "a geometry column or latitude/longitude columns are required",
            ErrorCode::SpatialEncoding => "geometry file encoding could not be decoded",
            ErrorCode::BuildingId => "building source has no buildingID column",
            ErrorCode::MergeBuildings => "failed to assign records to buildings",
            ErrorCode::AddKeyCode => "failed to attach areal unit codes",
            ErrorCode::DataFormat => "archive does not contain a complete shapefile bundle",
            ErrorCode::MergeGeometry => "building or areal unit geometry is invalid",
            ErrorCode::CsvGeometry => "geometry column contains no usable values",
            ErrorCode::BuildingPolygonData => "building polygon data is invalid",
            ErrorCode::ArealUnitData => "areal unit polygon data is invalid",
            ErrorCode::CoordinateSystem => "no coordinate system is known for the region",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage boundaries at which failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Normalize,
    Linkage,
    Spatial,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Linkage => "linkage",
            Stage::Spatial => "spatial",
        }
    }

    /// Code reported when nothing more specific was recorded
    pub fn fallback_code(&self) -> ErrorCode {
        match self {
            Stage::Normalize => ErrorCode::Cleaning,
            Stage::Linkage => ErrorCode::TextMatching,
            Stage::Spatial => ErrorCode::SpatialJoin,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a stage, carrying the recorded diagnostic code.
#[derive(Error, Debug)]
#[error("{stage} failed [{code}]: {message}")]
pub struct StageFailure {
    pub stage: Stage,
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<LinkageError>,
}

/// First-error-wins record of the most specific failure seen inside a stage.
///
/// A stage owns one value for the duration of a call and threads it through
/// its helpers; only the first `note` sticks.
#[derive(Debug, Default)]
pub struct Diagnostics {
    recorded: Option<(ErrorCode, String)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, code: ErrorCode, message: impl Into<String>) {
        if self.recorded.is_none() {
            self.recorded = Some((code, message.into()));
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.recorded.as_ref().map(|(code, _)| *code)
    }

    /// Close the stage with `err`, keeping the recorded code or the stage fallback.
    pub fn into_failure(self, stage: Stage, err: LinkageError) -> StageFailure {
        let (code, detail) = match self.recorded {
            Some((code, detail)) => (code, detail),
            None => (stage.fallback_code(), err.to_string()),
        };
        let message = match stage {
            // linkage failures surface as one opaque message; the code keeps the detail
            Stage::Linkage => ErrorCode::TextMatching.default_message().to_string(),
            _ => format!("{}: {}", code.default_message(), detail),
        };
        StageFailure {
            stage,
            code,
            message,
            source: Some(err),
        }
    }
}

pub trait ResultExt<T> {
    /// Record `code` in `diag` when this result is an error.
    fn note(self, diag: &mut Diagnostics, code: ErrorCode) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn note(self, diag: &mut Diagnostics, code: ErrorCode) -> Result<T> {
        self.map_err(|err| {
            diag.note(code, err.to_string());
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let mut diag = Diagnostics::new();
        diag.note(ErrorCode::ConvertWkt, "bad polygon");
        diag.note(ErrorCode::SpatialJoin, "later failure");
        assert_eq!(diag.code(), Some(ErrorCode::ConvertWkt));

        let failure = diag.into_failure(Stage::Spatial, LinkageError::Format("x".into()));
        assert_eq!(failure.code, ErrorCode::ConvertWkt);
        assert!(failure.message.contains("bad polygon"));
    }

    #[test]
    fn test_fallback_code_when_nothing_recorded() {
        let failure =
            Diagnostics::new().into_failure(Stage::Spatial, LinkageError::Geometry("boom".into()));
        assert_eq!(failure.code, ErrorCode::SpatialJoin);
    }

    #[test]
    fn test_linkage_failure_is_opaque() {
        let mut diag = Diagnostics::new();
        let result: Result<()> = Err(LinkageError::Schema("column missing".into()));
        let err = result.note(&mut diag, ErrorCode::LinkImportFormat).unwrap_err();
        let failure = diag.into_failure(Stage::Linkage, err);
        assert_eq!(failure.code, ErrorCode::LinkImportFormat);
        assert_eq!(failure.message, "text matching failed");
        assert!(failure.source.is_some());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LinkageError::Encoding("x".into()).kind(), ErrorKind::Encoding);
        assert_eq!(LinkageError::DataQuality("x".into()).kind(), ErrorKind::DataQuality);
        assert_eq!(LinkageError::Geometry("x".into()).kind(), ErrorKind::Geometry);
    }
}
