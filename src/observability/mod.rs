// Observability: metric names and per-phase recording helpers

pub mod metrics;

pub use metrics::{describe_all, MetricName};
