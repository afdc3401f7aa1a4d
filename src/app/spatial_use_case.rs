use rand::Rng;
use std::path::Path;

use crate::config::RunConfig;
use crate::error::{Diagnostics, ErrorCode, Result, ResultExt, Stage, StageFailure};
use crate::infra::geo_source::read_features;
use crate::pipeline::crs::{CoordinateSystemResolver, PlaneZone};
use crate::pipeline::spatial::{SpatialAssigner, SpatialInputs, SpatialOutcome};
use crate::table::Table;

/// Resolve the run's plane zone from its region and municipality.
pub fn resolve_zone(config: &RunConfig) -> Result<PlaneZone> {
    let default_zone = config.run.default_zone.map(PlaneZone::new).transpose()?;
    CoordinateSystemResolver::new(default_zone).resolve(&config.run.region, &config.run.municipality)
}

pub struct SpatialUseCase<'a> {
    config: &'a RunConfig,
}

impl<'a> SpatialUseCase<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    pub fn assign<R: Rng>(
        &self,
        points: Table,
        buildings: &Path,
        areal_units: &Path,
        rng: R,
    ) -> std::result::Result<SpatialOutcome, StageFailure> {
        let mut diag = Diagnostics::new();
        self.try_assign(points, buildings, areal_units, rng, &mut diag)
            .map_err(|err| diag.into_failure(Stage::Spatial, err))
    }

    fn try_assign<R: Rng>(
        &self,
        points: Table,
        buildings: &Path,
        areal_units: &Path,
        rng: R,
        diag: &mut Diagnostics,
    ) -> Result<SpatialOutcome> {
        let zone = resolve_zone(self.config).note(diag, ErrorCode::CoordinateSystem)?;
        let geometry_column = &self.config.spatial.geometry_column;
        let buildings = read_features(buildings, geometry_column, diag)?;
        let areal_units = read_features(areal_units, geometry_column, diag)?;
        let mut assigner = SpatialAssigner::new(self.config.spatial.clone(), zone, rng);
        assigner.assign(
            SpatialInputs {
                points,
                buildings,
                areal_units,
            },
            diag,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_resolve_zone_with_default() {
        let config = RunConfig::from_toml("[run]\nregion = \"東京都\"\nmunicipality = \"千代田区\"").unwrap();
        assert_eq!(resolve_zone(&config).unwrap().number(), 9);

        let config = RunConfig::from_toml("[run]\nregion = \"Atlantis\"\ndefault_zone = 4").unwrap();
        assert_eq!(resolve_zone(&config).unwrap().number(), 4);
    }

    #[test]
    fn test_unknown_region_is_coordinate_system_failure() {
        let config = RunConfig::from_toml("[run]\nregion = \"Atlantis\"").unwrap();
        let failure = SpatialUseCase::new(&config)
            .assign(
                Table::default(),
                Path::new("b.geojson"),
                Path::new("a.geojson"),
                StdRng::seed_from_u64(0),
            )
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::CoordinateSystem);
        assert_eq!(failure.stage, Stage::Spatial);
    }

    #[test]
    fn test_unsupported_building_file() {
        let config = RunConfig::from_toml("[run]\nregion = \"東京都\"").unwrap();
        let failure = SpatialUseCase::new(&config)
            .assign(
                Table::default(),
                Path::new("buildings.kml"),
                Path::new("a.geojson"),
                StdRng::seed_from_u64(0),
            )
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::AllowedExtension);
    }
}
