// Record processing: normalization, coordinate systems, linkage and spatial assignment

pub mod processing;

pub use processing::{crs, linkage, normalize, spatial};
