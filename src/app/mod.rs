pub mod linkage_use_case;
pub mod normalize_use_case;
pub mod ports;
pub mod run;
pub mod spatial_use_case;

pub use linkage_use_case::{LinkageReport, LinkageUseCase};
pub use normalize_use_case::{CleanedSource, NormalizeOutcome, NormalizeUseCase};
pub use run::{run_pipeline, RunSummary};
pub use spatial_use_case::{resolve_zone, SpatialUseCase};
