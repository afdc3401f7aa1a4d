use crate::error::{ErrorCode, Stage};

/// Receives job status events from the pipeline driver
pub trait JobReporter {
    /// `percent` runs from 0 to 100 across a whole run.
    fn progress(&mut self, stage: Stage, percent: u8);

    fn succeeded(&mut self, stage: Stage, summary: &serde_json::Value);

    fn failed(&mut self, stage: Stage, code: ErrorCode, message: &str);
}
