use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::app::ports::JobReporter;
use crate::error::{ErrorCode, Stage};

/// Reports job events to the log only
#[derive(Debug, Default)]
pub struct TracingReporter;

impl JobReporter for TracingReporter {
    fn progress(&mut self, stage: Stage, percent: u8) {
        info!(stage = %stage, percent, "progress");
    }

    fn succeeded(&mut self, stage: Stage, summary: &serde_json::Value) {
        info!(stage = %stage, summary = %summary, "stage succeeded");
    }

    fn failed(&mut self, stage: Stage, code: ErrorCode, message: &str) {
        error!(stage = %stage, code = %code, "{}", message);
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JobEvent<'a> {
    Progress {
        stage: &'a str,
        percent: u8,
    },
    Succeeded {
        stage: &'a str,
        summary: &'a serde_json::Value,
    },
    Failed {
        stage: &'a str,
        code: &'a str,
        message: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: JobEvent<'a>,
}

/// Appends one JSON object per event to a status file
pub struct JsonLinesReporter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesReporter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Writing job status to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    fn write(&mut self, event: JobEvent<'_>) {
        let envelope = Envelope {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };
        let written = serde_json::to_writer(&mut self.writer, &envelope)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        // status reporting never fails a run
        if let Err(e) = written {
            warn!("Failed to write job status to {}: {}", self.path.display(), e);
        }
    }
}

impl JobReporter for JsonLinesReporter {
    fn progress(&mut self, stage: Stage, percent: u8) {
        self.write(JobEvent::Progress {
            stage: stage.as_str(),
            percent: percent.min(100),
        });
    }

    fn succeeded(&mut self, stage: Stage, summary: &serde_json::Value) {
        self.write(JobEvent::Succeeded {
            stage: stage.as_str(),
            summary,
        });
    }

    fn failed(&mut self, stage: Stage, code: ErrorCode, message: &str) {
        self.write(JobEvent::Failed {
            stage: stage.as_str(),
            code: code.as_str(),
            message,
        });
    }
}
