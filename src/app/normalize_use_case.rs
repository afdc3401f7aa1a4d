use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::RunConfig;
use crate::constants::SourceKind;
use crate::error::{Diagnostics, ErrorCode, ErrorKind, LinkageError, Result, ResultExt, Stage, StageFailure};
use crate::infra::tabular;
use crate::observability::metrics;
use crate::pipeline::linkage::source_label;
use crate::pipeline::normalize::{AddressNormalizer, SourceCleaner, SourceInput, SourceTable};
use crate::table::Table;

/// A cleaned source and the label its columns are suffixed with
#[derive(Debug, Clone)]
pub struct CleanedSource {
    pub label: String,
    pub source: SourceTable,
}

#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    /// Resident registry when supplied, else water status
    pub main: CleanedSource,
    pub others: Vec<CleanedSource>,
}

impl NormalizeOutcome {
    pub fn labels(&self) -> Vec<String> {
        std::iter::once(&self.main)
            .chain(&self.others)
            .map(|s| s.label.clone())
            .collect()
    }
}

/// Diagnostic code for a failure to read an input table
pub fn read_error_code(err: &LinkageError, stage: Stage) -> ErrorCode {
    match (stage, err.kind()) {
        (Stage::Linkage, ErrorKind::Format) => ErrorCode::LinkImportFormat,
        (Stage::Linkage, ErrorKind::Encoding) => ErrorCode::LinkEncoding,
        (Stage::Linkage, _) => ErrorCode::LinkFileLoading,
        (_, ErrorKind::Format) => ErrorCode::ImportFormat,
        (_, ErrorKind::Encoding) => ErrorCode::Encoding,
        _ => ErrorCode::FileLoading,
    }
}

pub(crate) fn read_input(path: &Path, stage: Stage, diag: &mut Diagnostics) -> Result<Table> {
    tabular::read_table(path).map_err(|err| {
        diag.note(read_error_code(&err, stage), err.to_string());
        err
    })
}

/// Cleans every configured source and writes `<kind>_cleaned.csv` files
/// into the run's work directory.
pub struct NormalizeUseCase<'a> {
    config: &'a RunConfig,
    work_dir: PathBuf,
    cleaner: SourceCleaner<AddressNormalizer>,
}

impl<'a> NormalizeUseCase<'a> {
    pub fn new(config: &'a RunConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            cleaner: SourceCleaner::new(AddressNormalizer::new()),
        }
    }

    pub fn run(&self) -> std::result::Result<NormalizeOutcome, StageFailure> {
        let mut diag = Diagnostics::new();
        self.clean_all(&mut diag)
            .map_err(|err| diag.into_failure(Stage::Normalize, err))
    }

    fn input(&self, kind: SourceKind) -> SourceInput {
        self.config
            .source(kind)
            .and_then(|s| s.path.clone())
            .into()
    }

    fn clean_all(&self, diag: &mut Diagnostics) -> Result<NormalizeOutcome> {
        let main_kind = match self.input(SourceKind::ResidentRegistry) {
            SourceInput::Provided(_) => SourceKind::ResidentRegistry,
            SourceInput::Absent => SourceKind::WaterStatus,
        };
        let SourceInput::Provided(main_path) = self.input(main_kind) else {
            return Err(LinkageError::Config(
                "a resident_registry or water_status source is required".into(),
            ));
        };
        let main = self.clean_file(main_kind, &main_path, diag)?;

        let mut others = Vec::new();
        for kind in SourceKind::ALL.into_iter().filter(|k| *k != main_kind) {
            match self.input(kind) {
                SourceInput::Provided(path) => others.push(self.clean_file(kind, &path, diag)?),
                SourceInput::Absent if kind.synthesized_when_absent() => {
                    let source = SourceTable::synthetic(kind, &main.source.table).note(diag, ErrorCode::Cleaning)?;
                    metrics::normalize::synthetic_source(kind.as_str());
                    info!("No {} input; using {} default rows", kind, source.table.len());
                    others.push(CleanedSource {
                        label: kind.as_str().to_string(),
                        source,
                    });
                }
                SourceInput::Absent => {}
            }
        }
        Ok(NormalizeOutcome { main, others })
    }

    fn clean_file(&self, kind: SourceKind, path: &Path, diag: &mut Diagnostics) -> Result<CleanedSource> {
        let table = read_input(path, Stage::Normalize, diag)?;
        let field_map = self.config.field_map(kind).note(diag, ErrorCode::SourceSchema)?;
        let (source, stats) = self.cleaner.clean(table, &field_map).map_err(|err| {
            let code = match err.kind() {
                ErrorKind::Schema => ErrorCode::SourceSchema,
                _ => ErrorCode::Cleaning,
            };
            diag.note(code, err.to_string());
            err
        })?;
        metrics::normalize::rows_cleaned(kind.as_str(), source.table.len(), stats.rows_dropped);

        let output = self.work_dir.join(format!("{}_cleaned.csv", kind));
        tabular::write_table(&output, &source.table).note(diag, ErrorCode::CreateDataProcessed)?;
        Ok(CleanedSource {
            label: source_label(path),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::TableOrigin;
    use std::fs;

    fn config_for(dir: &Path, toml: &str) -> RunConfig {
        let text = toml.replace("{dir}", &dir.display().to_string());
        RunConfig::from_toml(&text).unwrap()
    }

    #[test]
    fn test_water_status_is_main_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("water_status_01.csv"),
            "meter_number,usage_status,address,usage_start_date,usage_end_date\n1,1,本町１丁目２番,20200101,\n",
        )
        .unwrap();
        let config = config_for(
            dir.path(),
            "[sources.water_status]\npath = \"{dir}/water_status_01.csv\"\n",
        );
        let work = dir.path().join("work");
        let outcome = NormalizeUseCase::new(&config, &work).run().unwrap();

        assert_eq!(outcome.main.label, "water_status");
        assert_eq!(outcome.main.source.kind, SourceKind::WaterStatus);
        assert!(work.join("water_status_cleaned.csv").exists());
        let synthetic: Vec<SourceKind> = outcome
            .others
            .iter()
            .filter(|s| s.source.origin == TableOrigin::Synthetic)
            .map(|s| s.source.kind)
            .collect();
        assert_eq!(synthetic, vec![SourceKind::VacantHouse, SourceKind::Geocoding]);
        assert_eq!(outcome.labels()[0], "water_status");
    }

    #[test]
    fn test_missing_main_source_fails() {
        let config = RunConfig::default();
        let failure = NormalizeUseCase::new(&config, "unused").run().unwrap_err();
        assert_eq!(failure.stage, Stage::Normalize);
        assert_eq!(failure.code, ErrorCode::Cleaning);
    }

    #[test]
    fn test_unsupported_extension_is_import_format() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("registry.xlsx"), "x").unwrap();
        let config = config_for(
            dir.path(),
            "[sources.resident_registry]\npath = \"{dir}/registry.xlsx\"\n",
        );
        let failure = NormalizeUseCase::new(&config, dir.path()).run().unwrap_err();
        assert_eq!(failure.code, ErrorCode::ImportFormat);
    }

    #[test]
    fn test_read_error_codes_per_stage() {
        let err = LinkageError::Encoding("x".into());
        assert_eq!(read_error_code(&err, Stage::Normalize), ErrorCode::Encoding);
        assert_eq!(read_error_code(&err, Stage::Linkage), ErrorCode::LinkEncoding);
    }
}
