use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use super::linkage_use_case::LinkageUseCase;
use super::normalize_use_case::NormalizeUseCase;
use super::ports::JobReporter;
use super::spatial_use_case::SpatialUseCase;
use crate::config::RunConfig;
use crate::error::{Diagnostics, ErrorCode, LinkageError, Stage, StageFailure};
use crate::infra::tabular::write_table;
use crate::pipeline::linkage::summary::JoinRates;
use crate::pipeline::linkage::{LinkParams, RecordLinker};
use crate::table::Table;

pub const LINKED_FILE: &str = "linked.csv";
pub const RESIDENCES_FILE: &str = "residences.csv";

#[derive(Debug, Clone, Serialize)]
pub struct SourceRates {
    pub source: String,
    #[serde(flatten)]
    pub rates: JoinRates,
}

/// What one full run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub output: PathBuf,
    pub rows: usize,
    pub input_source: Vec<String>,
    pub linkage: Vec<SourceRates>,
    /// Absent when no building or areal-unit source was configured
    pub joining_rate: Option<f64>,
}

fn report_failure(reporter: &mut dyn JobReporter, failure: StageFailure) -> anyhow::Error {
    reporter.failed(failure.stage, failure.code, &failure.message);
    anyhow::Error::new(failure)
}

/// Report an error raised between use cases as a failure of `stage`.
fn stage_error(reporter: &mut dyn JobReporter, stage: Stage, err: LinkageError) -> anyhow::Error {
    let mut diag = Diagnostics::new();
    if stage == Stage::Normalize {
        diag.note(ErrorCode::CreateDataProcessed, err.to_string());
    }
    report_failure(reporter, diag.into_failure(stage, err))
}

fn write_output(reporter: &mut dyn JobReporter, stage: Stage, path: &Path, table: &Table) -> Result<()> {
    write_table(path, table).map_err(|err| stage_error(reporter, stage, err))
}

/// Run normalization, linkage and, when configured, spatial assignment.
///
/// Intermediate files go to a fresh `<work_root>/<uuid>` directory that is
/// removed afterwards unless `keep_work_dir` is set.
pub fn run_pipeline(config: &RunConfig, reporter: &mut dyn JobReporter) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let work_dir = config.run.work_root.join(run_id.to_string());
    fs::create_dir_all(&work_dir)
        .map_err(|err| stage_error(reporter, Stage::Normalize, err.into()))
        .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;
    info!("Starting run {} in {}", run_id, work_dir.display());

    let result = run_stages(config, reporter, run_id, &work_dir);

    if config.run.keep_work_dir {
        info!("Keeping work directory {}", work_dir.display());
    } else if let Err(e) = fs::remove_dir_all(&work_dir) {
        warn!("Failed to remove work directory {}: {}", work_dir.display(), e);
    }
    result
}

fn run_stages(
    config: &RunConfig,
    reporter: &mut dyn JobReporter,
    run_id: Uuid,
    work_dir: &Path,
) -> Result<RunSummary> {
    reporter.progress(Stage::Normalize, 0);
    let normalized = NormalizeUseCase::new(config, work_dir)
        .run()
        .map_err(|f| report_failure(reporter, f))?;
    let input_source = normalized.labels();
    reporter.succeeded(Stage::Normalize, &json!({ "input_source": input_source }));

    reporter.progress(Stage::Linkage, 30);
    let linker = RecordLinker::new(LinkParams::from_config(&config.linkage, config.run.merge_base));
    let linked = LinkageUseCase::new(linker)
        .link_all(normalized.main, normalized.others)
        .map_err(|f| report_failure(reporter, f))?;
    let linkage: Vec<SourceRates> = linked
        .rates
        .into_iter()
        .map(|(source, rates)| SourceRates { source, rates })
        .collect();
    write_output(reporter, Stage::Linkage, &work_dir.join(LINKED_FILE), &linked.table)?;
    let rates = serde_json::to_value(&linkage).map_err(|err| stage_error(reporter, Stage::Linkage, err.into()))?;
    reporter.succeeded(Stage::Linkage, &rates);

    let (output, rows, joining_rate) = match (&config.spatial.buildings, &config.spatial.areal_units) {
        (Some(buildings), Some(areal_units)) => {
            reporter.progress(Stage::Spatial, 60);
            let outcome = SpatialUseCase::new(config)
                .assign(linked.table, buildings, areal_units, rand::thread_rng())
                .map_err(|f| report_failure(reporter, f))?;
            let output = config.run.output_dir.join(RESIDENCES_FILE);
            write_output(reporter, Stage::Spatial, &output, &outcome.table)?;
            reporter.succeeded(
                Stage::Spatial,
                &json!({ "joining_rate": outcome.join_ratio, "input_source": input_source }),
            );
            (output, outcome.table.len(), Some(outcome.join_ratio))
        }
        _ => {
            warn!("No building or areal-unit source configured; skipping spatial assignment");
            let output = config.run.output_dir.join(LINKED_FILE);
            write_output(reporter, Stage::Linkage, &output, &linked.table)?;
            (output, linked.table.len(), None)
        }
    };
    reporter.progress(Stage::Spatial, 100);

    Ok(RunSummary {
        run_id,
        output,
        rows,
        input_source,
        linkage,
        joining_rate,
    })
}
