pub mod geo_source;
pub mod job_reporter;
pub mod tabular;
pub mod wkb;

pub use job_reporter::{JsonLinesReporter, TracingReporter};
