use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use residence_link::app::ports::JobReporter;
use residence_link::app::{run_pipeline, LinkageUseCase, NormalizeUseCase, SpatialUseCase};
use residence_link::config::RunConfig;
use residence_link::infra::tabular::{read_table, write_table};
use residence_link::infra::{JsonLinesReporter, TracingReporter};
use residence_link::logging;
use residence_link::observability;
use residence_link::pipeline::linkage::{LinkParams, RecordLinker};

const LOG_DIR: &str = "logs";

#[derive(Parser)]
#[command(name = "residence_link")]
#[command(about = "Link municipal residence records and assign them to building footprints")]
#[command(version = "0.1.0")]
struct Cli {
    /// Run configuration (defaults to RESIDENCE_LINK_CONFIG or config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean every configured source into <kind>_cleaned.csv files
    Normalize,
    /// Link a secondary table into a primary table by address
    Link {
        #[arg(long)]
        primary: PathBuf,
        #[arg(long)]
        secondary: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Assign linked records to building footprints and areal units
    Assign {
        #[arg(long)]
        points: PathBuf,
        #[arg(long)]
        buildings: PathBuf,
        #[arg(long = "areal-units")]
        areal_units: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Normalize, link and assign in one run
    Run,
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    let config = match path {
        Some(path) => RunConfig::load_from(path),
        None => RunConfig::load(),
    };
    config.context("Failed to load run configuration")
}

fn reporter(config: &RunConfig) -> Result<Box<dyn JobReporter>> {
    Ok(match &config.run.status_file {
        Some(path) => Box::new(
            JsonLinesReporter::create(path)
                .with_context(|| format!("Failed to open status file {}", path.display()))?,
        ),
        None => Box::new(TracingReporter),
    })
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging(Path::new(LOG_DIR)).context("Failed to initialize logging")?;
    observability::describe_all();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Normalize => {
            println!("🧹 Cleaning configured sources...");
            let outcome = NormalizeUseCase::new(&config, &config.run.output_dir).run()?;
            println!("✅ Cleaned {} sources into {}", outcome.labels().len(), config.run.output_dir.display());
            for label in outcome.labels() {
                println!("   - {}", label);
            }
        }
        Commands::Link {
            primary,
            secondary,
            output,
        } => {
            println!("🔗 Linking {} into {}...", secondary.display(), primary.display());
            let linker = RecordLinker::new(LinkParams::from_config(&config.linkage, config.run.merge_base));
            let outcome = LinkageUseCase::new(linker).link_files(&primary, &secondary)?;
            write_table(&output, &outcome.table)?;
            println!("\n📊 Linkage results:");
            for line in outcome.summary.lines() {
                println!("   {}", line);
            }
            println!("   Output file: {}", output.display());
        }
        Commands::Assign {
            points,
            buildings,
            areal_units,
            output,
        } => {
            println!("🏠 Assigning records to buildings...");
            let table = read_table(&points).with_context(|| format!("Failed to read {}", points.display()))?;
            let outcome = SpatialUseCase::new(&config).assign(table, &buildings, &areal_units, rand::thread_rng())?;
            write_table(&output, &outcome.table)?;
            println!("\n📊 Assignment results:");
            println!("   Joining rate: {:.2}%", outcome.join_ratio);
            println!("   Assigned points: {} of {}", outcome.assigned_points, outcome.located_points);
            println!("   Multi-unit buildings excluded: {}", outcome.multi_unit_excluded);
            println!("   Output file: {}", output.display());
        }
        Commands::Run => {
            println!("🚀 Running full pipeline...");
            let mut reporter = reporter(&config)?;
            match run_pipeline(&config, reporter.as_mut()) {
                Ok(summary) => {
                    info!("Run {} finished", summary.run_id);
                    println!("\n📊 Run {}:", summary.run_id);
                    for source in &summary.linkage {
                        println!(
                            "   {}: exact {:.2}%, inclusive {:.2}%",
                            source.source, source.rates.exact, source.rates.inclusive
                        );
                    }
                    if let Some(rate) = summary.joining_rate {
                        println!("   Joining rate: {:.2}%", rate);
                    }
                    println!("   Rows: {}", summary.rows);
                    println!("✅ Output file: {}", summary.output.display());
                }
                Err(e) => {
                    error!("Run failed: {:#}", e);
                    println!("❌ Run failed: {:#}", e);
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
