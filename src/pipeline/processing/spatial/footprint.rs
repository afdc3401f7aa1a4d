use geo::{Area, Centroid, Geometry, Point};
use tracing::{debug, warn};

use crate::config::{BuildingDataType, SpatialConfig};
use crate::constants::{BUILDING_ID, PLATEAU_BUILDING_ID};
use crate::error::{Diagnostics, ErrorCode, LinkageError, Result, ResultExt};
use crate::infra::geo_source::FeatureSet;
use crate::pipeline::processing::crs::{to_plane, PlaneZone, SourceCrs};
use crate::table::Table;

/// A building polygon in the local plane zone
#[derive(Debug, Clone)]
pub struct Footprint {
    /// Row of the building in the attribute table
    pub row: usize,
    pub building_id: String,
    pub polygon: Geometry<f64>,
    pub centroid: Point<f64>,
    pub area: f64,
}

#[derive(Debug, Clone)]
pub struct BuildingSet {
    pub attributes: Table,
    pub footprints: Vec<Footprint>,
    /// Buildings above the area ceiling or without a centroid
    pub discarded: usize,
}

/// Building ids for every attribute row.
///
/// PLATEAU data must carry `buildingID`. Otherwise the configured column is
/// used, then an existing `building_id`, then the 1-based row position.
pub fn building_ids(attributes: &Table, config: &SpatialConfig, diag: &mut Diagnostics) -> Result<Vec<String>> {
    let column = match (config.data_type, &config.building_id_column) {
        (BuildingDataType::Plateau, _) => Some(PLATEAU_BUILDING_ID),
        (BuildingDataType::Generic, Some(name)) => Some(name.as_str()),
        (BuildingDataType::Generic, None) => attributes.has_column(BUILDING_ID).then_some(BUILDING_ID),
    };
    match column {
        Some(name) => {
            let idx = attributes
                .require_column(name, "buildings")
                .note(diag, ErrorCode::BuildingId)?;
            Ok(attributes.column_values(idx).map(str::to_string).collect())
        }
        None => Ok((1..=attributes.len()).map(|i| i.to_string()).collect()),
    }
}

/// Project building polygons into `zone`, compute area and centroid, and keep
/// those below the configured area ceiling.
pub fn prepare_buildings(
    features: FeatureSet,
    config: &SpatialConfig,
    zone: PlaneZone,
    diag: &mut Diagnostics,
) -> Result<BuildingSet> {
    let crs = match features.crs {
        SourceCrs::Unknown => {
            warn!("Building source has no coordinate reference; assuming {}", zone);
            SourceCrs::Plane(zone)
        }
        known => known,
    };
    let ids = building_ids(&features.attributes, config, diag)?;

    let mut footprints = Vec::with_capacity(features.geometries.len());
    let mut discarded = 0;
    for (row, geometry) in features.geometries.iter().enumerate() {
        if !matches!(geometry, Geometry::Polygon(_) | Geometry::MultiPolygon(_)) {
            let err = LinkageError::Geometry(format!("building {} is not a polygon", ids[row]));
            diag.note(ErrorCode::BuildingPolygonData, err.to_string());
            return Err(err);
        }
        let polygon = to_plane(geometry, crs, zone).note(diag, ErrorCode::MergeGeometry)?;
        let area = polygon.unsigned_area();
        let centroid = match polygon.centroid() {
            Some(c) if area < config.max_building_area => c,
            _ => {
                discarded += 1;
                continue;
            }
        };
        footprints.push(Footprint {
            row,
            building_id: ids[row].clone(),
            polygon,
            centroid,
            area,
        });
    }
    if discarded > 0 {
        warn!(
            "Discarded {} buildings of {} m² or more, or without area",
            discarded, config.max_building_area
        );
    }
    debug!("Prepared {} building footprints in {}", footprints.len(), zone);
    Ok(BuildingSet {
        attributes: features.attributes,
        footprints,
        discarded,
    })
}
