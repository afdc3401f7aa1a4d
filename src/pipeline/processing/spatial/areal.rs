use geo::{BoundingRect, Geometry, Intersects, Point};
use rstar::{RTree, RTreeObject, AABB};
use tracing::debug;

use crate::config::SpatialConfig;
use crate::error::{Diagnostics, ErrorCode, LinkageError, Result, ResultExt};
use crate::infra::geo_source::FeatureSet;
use crate::pipeline::processing::crs::{to_plane, PlaneZone, SourceCrs};

#[derive(Debug, Clone)]
struct UnitNode {
    unit: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for UnitNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Code and name of one areal unit (census block or similar)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArealUnit {
    pub code: String,
    pub name: String,
}

/// Areal-unit polygons in the plane zone, indexed by bounding box.
pub struct ArealIndex {
    units: Vec<ArealUnit>,
    polygons: Vec<Geometry<f64>>,
    tree: RTree<UnitNode>,
}

impl ArealIndex {
    pub fn build(
        features: FeatureSet,
        config: &SpatialConfig,
        zone: PlaneZone,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        if features.crs == SourceCrs::Unknown {
            let err = LinkageError::Geometry("areal unit source has no coordinate reference".into());
            diag.note(ErrorCode::ArealUnitData, err.to_string());
            return Err(err);
        }
        let attributes = &features.attributes;
        let code = attributes
            .require_column(&config.areal_code_column, "areal units")
            .note(diag, ErrorCode::AddKeyCode)?;
        let name = attributes
            .require_column(&config.areal_name_column, "areal units")
            .note(diag, ErrorCode::AddKeyCode)?;

        let mut units = Vec::with_capacity(attributes.len());
        let mut polygons = Vec::with_capacity(attributes.len());
        let mut nodes = Vec::with_capacity(attributes.len());
        for (row, geometry) in features.geometries.iter().enumerate() {
            if !matches!(geometry, Geometry::Polygon(_) | Geometry::MultiPolygon(_)) {
                let err = LinkageError::Geometry(format!("areal unit {} is not a polygon", row + 1));
                diag.note(ErrorCode::ArealUnitData, err.to_string());
                return Err(err);
            }
            let polygon = to_plane(geometry, features.crs, zone).note(diag, ErrorCode::ArealUnitData)?;
            let Some(rect) = polygon.bounding_rect() else {
                continue;
            };
            nodes.push(UnitNode {
                unit: units.len(),
                envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            });
            units.push(ArealUnit {
                code: attributes.value(row, code).to_string(),
                name: attributes.value(row, name).to_string(),
            });
            polygons.push(polygon);
        }
        debug!("Indexed {} areal units", units.len());
        Ok(Self {
            units,
            polygons,
            tree: RTree::bulk_load(nodes),
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The lowest-indexed unit covering `xy`, boundary included.
    pub fn locate(&self, xy: [f64; 2]) -> Option<&ArealUnit> {
        let point = Point::new(xy[0], xy[1]);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point(xy))
            .filter(|node| self.polygons[node.unit].intersects(&point))
            .map(|node| node.unit)
            .min()
            .map(|unit| &self.units[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use geo::polygon;

    fn unit(x0: f64, side: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: 0.0),
            (x: x0 + side, y: 0.0),
            (x: x0 + side, y: side),
            (x: x0, y: side),
            (x: x0, y: 0.0),
        ])
    }

    fn features(crs: SourceCrs) -> FeatureSet {
        FeatureSet {
            attributes: Table::from_rows(
                vec!["KEY_CODE".into(), "S_NAME".into()],
                vec![
                    vec!["131010010".into(), "丸の内".into()],
                    vec!["131010020".into(), "大手町".into()],
                ],
            ),
            geometries: vec![unit(0.0, 100.0), unit(50.0, 100.0)],
            crs,
        }
    }

    #[test]
    fn test_locate_prefers_first_unit() {
        let zone = PlaneZone::new(9).unwrap();
        let index = ArealIndex::build(
            features(SourceCrs::Plane(zone)),
            &SpatialConfig::default(),
            zone,
            &mut Diagnostics::new(),
        )
        .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.locate([10.0, 10.0]).unwrap().name, "丸の内");
        assert_eq!(index.locate([60.0, 10.0]).unwrap().code, "131010010");
        assert_eq!(index.locate([120.0, 10.0]).unwrap().code, "131010020");
        assert!(index.locate([500.0, 10.0]).is_none());
    }

    #[test]
    fn test_unknown_crs_is_fatal() {
        let zone = PlaneZone::new(9).unwrap();
        let mut diag = Diagnostics::new();
        let result = ArealIndex::build(features(SourceCrs::Unknown), &SpatialConfig::default(), zone, &mut diag);
        assert!(matches!(result, Err(LinkageError::Geometry(_))));
        assert_eq!(diag.code(), Some(ErrorCode::ArealUnitData));
    }

    #[test]
    fn test_missing_code_column() {
        let zone = PlaneZone::new(9).unwrap();
        let config = SpatialConfig {
            areal_code_column: "CODE".into(),
            ..SpatialConfig::default()
        };
        let mut diag = Diagnostics::new();
        assert!(ArealIndex::build(features(SourceCrs::Plane(zone)), &config, zone, &mut diag).is_err());
        assert_eq!(diag.code(), Some(ErrorCode::AddKeyCode));
    }
}
