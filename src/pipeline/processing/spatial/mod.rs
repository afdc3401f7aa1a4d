//! Assignment of linked records to building footprints.
//!
//! Points and buildings are brought into the resolved plane zone, each
//! building keeps at most its closest point, assigned rows get a residence id
//! and an areal-unit tag, and buildings that look like multi-unit blocks are
//! removed. Geometries leave this module as WKT in EPSG:4326.

pub mod areal;
pub mod footprint;
pub mod join;
pub mod multi_unit;
pub mod points;
pub mod residence;

use rand::Rng;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};
use wkt::ToWkt;

use crate::config::{JoinMethod, SpatialConfig};
use crate::constants::{AREA_NAME, BUILDING_GEOMETRY, BUILDING_ID, GEOMETRY, KEY_CODE, RESIDENCE_ID};
use crate::error::{Diagnostics, ErrorCode, Result, ResultExt};
use crate::infra::geo_source::FeatureSet;
use crate::observability::metrics;
use crate::pipeline::processing::crs::{to_geographic, PlaneZone};
use crate::pipeline::processing::linkage::summary::rate;
use crate::table::Table;

pub use areal::{ArealIndex, ArealUnit};
pub use footprint::{prepare_buildings, BuildingSet, Footprint};
pub use join::{buffer_radius, containment_join, nearest_join, JoinResult, Pairing};
pub use multi_unit::multi_unit_buildings;
pub use points::{extract_points, PointSet};
pub use residence::ResidenceIds;

pub const BUILDING_SUFFIX: &str = "_building";

const OUTPUT_COLUMNS: [&str; 6] = [BUILDING_ID, BUILDING_GEOMETRY, GEOMETRY, RESIDENCE_ID, KEY_CODE, AREA_NAME];

pub struct SpatialInputs {
    /// Linked records carrying a WKT geometry or latitude/longitude columns
    pub points: Table,
    pub buildings: FeatureSet,
    pub areal_units: FeatureSet,
}

#[derive(Debug, Clone)]
pub struct SpatialOutcome {
    pub table: Table,
    /// Percentage of located points assigned to a building
    pub join_ratio: f64,
    pub located_points: usize,
    pub assigned_points: usize,
    pub dropped_points: usize,
    pub discarded_buildings: usize,
    pub multi_unit_excluded: usize,
}

pub struct SpatialAssigner<R> {
    config: SpatialConfig,
    zone: PlaneZone,
    rng: R,
}

impl<R: Rng> SpatialAssigner<R> {
    pub fn new(config: SpatialConfig, zone: PlaneZone, rng: R) -> Self {
        Self { config, zone, rng }
    }

    pub fn zone(&self) -> PlaneZone {
        self.zone
    }

    pub fn assign(&mut self, inputs: SpatialInputs, diag: &mut Diagnostics) -> Result<SpatialOutcome> {
        let started = Instant::now();
        info!(
            "Assigning {} records to {} buildings in {}",
            inputs.points.len(),
            inputs.buildings.geometries.len(),
            self.zone
        );
        let points = extract_points(inputs.points, &self.config, self.zone, diag)?;
        let buildings = prepare_buildings(inputs.buildings, &self.config, self.zone, diag)?;
        let areal = ArealIndex::build(inputs.areal_units, &self.config, self.zone, diag)?;

        let centroids: Vec<[f64; 2]> = buildings
            .footprints
            .iter()
            .map(|f| [f.centroid.x(), f.centroid.y()])
            .collect();
        let joined = match self.config.join_method {
            JoinMethod::Intersects => {
                let radii: Vec<f64> = buildings
                    .footprints
                    .iter()
                    .map(|f| buffer_radius(f.area, self.config.buffer_multiplier))
                    .collect();
                containment_join(&points.plane, &centroids, &radii)
            }
            JoinMethod::Nearest => nearest_join(&points.plane, &centroids),
        };
        if joined.dropped > 0 {
            warn!("Dropped {} points that lost every building to a closer point", joined.dropped);
        }

        let assigned_points = joined.assigned_points();
        let join_ratio = rate(assigned_points, points.table.len());
        let excluded = multi_unit_buildings(
            &points.table,
            &self.config.meter_column,
            &joined.candidates,
            self.config.multi_unit_threshold,
        )
        .note(diag, ErrorCode::MergeBuildings)?;
        let multi_unit_excluded = excluded.len();
        let table = self.assemble(&points, &buildings, &areal, &joined, &excluded, diag)?;

        metrics::spatial::buildings_discarded(buildings.discarded);
        metrics::spatial::points_dropped(joined.dropped);
        metrics::spatial::multi_unit_excluded(multi_unit_excluded);
        metrics::spatial::join_ratio(join_ratio);
        metrics::spatial::duration(started.elapsed().as_secs_f64());
        info!(
            "Assigned {} of {} points ({}%), {} output rows",
            assigned_points,
            points.table.len(),
            join_ratio,
            table.len()
        );

        Ok(SpatialOutcome {
            table,
            join_ratio,
            located_points: points.table.len(),
            assigned_points,
            dropped_points: joined.dropped,
            discarded_buildings: buildings.discarded,
            multi_unit_excluded,
        })
    }

    fn assemble(
        &mut self,
        points: &PointSet,
        buildings: &BuildingSet,
        areal: &ArealIndex,
        joined: &JoinResult,
        excluded: &HashSet<usize>,
        diag: &mut Diagnostics,
    ) -> Result<Table> {
        let keep: Vec<usize> = points
            .table
            .headers()
            .iter()
            .enumerate()
            .filter(|(_, h)| !OUTPUT_COLUMNS.contains(&h.as_str()))
            .map(|(i, _)| i)
            .collect();
        if keep.len() < points.table.headers().len() {
            debug!("Replacing point columns that collide with assignment output");
        }

        let attributes = &buildings.attributes;
        let mut headers: Vec<String> = keep.iter().map(|&i| points.table.headers()[i].clone()).collect();
        headers.extend(attributes.headers().iter().map(|h| format!("{}{}", h, BUILDING_SUFFIX)));
        headers.extend(OUTPUT_COLUMNS.iter().map(|c| c.to_string()));
        let mut table = Table::new(headers);

        let mut residences = ResidenceIds::new();
        let blank_attributes = vec![String::new(); attributes.headers().len()];
        for pairing in &joined.pairings {
            if pairing.building.is_some_and(|b| excluded.contains(&b)) {
                continue;
            }
            let source = &points.table.rows()[pairing.point];
            let mut row: Vec<String> = keep.iter().map(|&i| source[i].clone()).collect();
            let point_wkt = points.lonlat[pairing.point].wkt_string();

            let (building_id, building_wkt, residence_id, lookup) = match pairing.building {
                Some(b) => {
                    let footprint = &buildings.footprints[b];
                    row.extend(attributes.rows()[footprint.row].iter().cloned());
                    let geographic = to_geographic(&footprint.polygon, self.zone).note(diag, ErrorCode::MergeGeometry)?;
                    let residence_id = residences.issue(&footprint.building_id, &mut self.rng);
                    (
                        footprint.building_id.clone(),
                        geographic.wkt_string(),
                        residence_id,
                        [footprint.centroid.x(), footprint.centroid.y()],
                    )
                }
                None => {
                    row.extend(blank_attributes.iter().cloned());
                    (String::new(), String::new(), String::new(), points.plane[pairing.point])
                }
            };
            let (key_code, area_name) = match areal.locate(lookup) {
                Some(unit) => (unit.code.clone(), unit.name.clone()),
                None => (String::new(), String::new()),
            };
            row.extend([building_id, building_wkt, point_wkt, residence_id, key_code, area_name]);
            table.push_row(row);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::crs::SourceCrs;
    use geo::{polygon, Geometry};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn square(x0: f64, y0: f64, side: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
            (x: x0, y: y0),
        ])
    }

    fn inputs(zone: PlaneZone) -> SpatialInputs {
        let tm = zone.projection();
        let near = tm.inverse(12.0, 12.0);
        let far = tm.inverse(5_000.0, 5_000.0);
        let points = Table::from_rows(
            vec!["name".into(), "lat_geocoding".into(), "lon_geocoding".into()],
            vec![
                vec!["near".into(), near.1.to_string(), near.0.to_string()],
                vec!["far".into(), far.1.to_string(), far.0.to_string()],
            ],
        );
        SpatialInputs {
            points,
            buildings: FeatureSet {
                attributes: Table::from_rows(vec!["floors".into()], vec![vec!["2".into()]]),
                geometries: vec![square(0.0, 0.0, 500f64.sqrt())],
                crs: SourceCrs::Plane(zone),
            },
            areal_units: FeatureSet {
                attributes: Table::from_rows(
                    vec!["KEY_CODE".into(), "S_NAME".into()],
                    vec![vec!["1".into(), "north".into()]],
                ),
                geometries: vec![square(-100.0, -100.0, 200.0)],
                crs: SourceCrs::Plane(zone),
            },
        }
    }

    #[test]
    fn test_assign_near_point() {
        let zone = PlaneZone::new(9).unwrap();
        let mut assigner = SpatialAssigner::new(SpatialConfig::default(), zone, StdRng::seed_from_u64(3));
        let outcome = assigner.assign(inputs(zone), &mut Diagnostics::new()).unwrap();
        assert_eq!(outcome.join_ratio, 50.0);
        assert_eq!(outcome.table.len(), 2);

        let t = &outcome.table;
        let id = t.column_index(BUILDING_ID).unwrap();
        let residence = t.column_index(RESIDENCE_ID).unwrap();
        let key = t.column_index(KEY_CODE).unwrap();
        let floors = t.column_index("floors_building").unwrap();
        assert_eq!(t.value(0, id), "1");
        assert!(t.value(0, residence).starts_with("1-"));
        assert_eq!(t.value(0, key), "1");
        assert_eq!(t.value(0, floors), "2");
        assert_eq!(t.value(1, id), "");
        assert_eq!(t.value(1, residence), "");
        assert_eq!(t.value(1, key), "");
        assert!(t.value(0, t.column_index(BUILDING_GEOMETRY).unwrap()).starts_with("POLYGON"));
        assert!(t.value(1, t.column_index(GEOMETRY).unwrap()).starts_with("POINT"));
        assert_eq!(t.headers().last().map(String::as_str), Some(AREA_NAME));
    }

    #[test]
    fn test_nearest_assigns_far_point_when_alone() {
        let zone = PlaneZone::new(9).unwrap();
        let config = SpatialConfig {
            join_method: JoinMethod::Nearest,
            ..SpatialConfig::default()
        };
        let mut data = inputs(zone);
        data.points.retain_rows(|row| row[0] == "far");
        let mut assigner = SpatialAssigner::new(config, zone, StdRng::seed_from_u64(3));
        let outcome = assigner.assign(data, &mut Diagnostics::new()).unwrap();
        assert_eq!(outcome.join_ratio, 100.0);
    }

    #[test]
    fn test_ambiguous_meter_column_fails_assignment() {
        let zone = PlaneZone::new(9).unwrap();
        let mut data = inputs(zone);
        let rows = data.points.len();
        data.points.set_column("meter_number_a", vec!["m1".into(); rows]).unwrap();
        data.points.set_column("meter_number_b", vec!["m2".into(); rows]).unwrap();

        let mut diag = Diagnostics::new();
        let mut assigner = SpatialAssigner::new(SpatialConfig::default(), zone, StdRng::seed_from_u64(3));
        assert!(assigner.assign(data, &mut diag).is_err());
        assert_eq!(diag.code(), Some(ErrorCode::MergeBuildings));
    }
}
