// Processing stages, in the order a run applies them

pub mod normalize;
pub mod crs;
pub mod linkage;
pub mod spatial;
