use geo::{Geometry, Point};
use tracing::{debug, warn};

use crate::config::SpatialConfig;
use crate::error::{Diagnostics, ErrorCode, LinkageError, Result, ResultExt};
use crate::infra::geo_source::parse_wkt;
use crate::pipeline::processing::crs::{to_plane, PlaneZone, SourceCrs};
use crate::table::Table;

/// Linked rows with a usable location, in longitude/latitude and in the plane zone
#[derive(Debug, Clone)]
pub struct PointSet {
    pub table: Table,
    pub lonlat: Vec<Point<f64>>,
    pub plane: Vec<[f64; 2]>,
}

enum Source {
    Wkt(usize),
    LatLon(usize, usize),
}

/// Locate every row by its WKT geometry column or, failing that, by its
/// latitude/longitude columns. Rows with an empty location are dropped.
pub fn extract_points(
    mut table: Table,
    config: &SpatialConfig,
    zone: PlaneZone,
    diag: &mut Diagnostics,
) -> Result<PointSet> {
    let source = if let Some(idx) = table.column_index(&config.geometry_column) {
        Source::Wkt(idx)
    } else {
        match (
            table.column_index(&config.latitude_column),
            table.column_index(&config.longitude_column),
        ) {
            (Some(lat), Some(lon)) => Source::LatLon(lat, lon),
            _ => {
                let err = LinkageError::Format(format!(
                    "points need a '{}' column or '{}'/'{}' columns",
                    config.geometry_column, config.latitude_column, config.longitude_column
                ));
                diag.note(ErrorCode::GeometryColumns, err.to_string());
                return Err(err);
            }
        }
    };

    let before = table.len();
    table.retain_rows(|row| match source {
        Source::Wkt(idx) => !row[idx].trim().is_empty(),
        Source::LatLon(lat, lon) => !row[lat].trim().is_empty() && !row[lon].trim().is_empty(),
    });
    if table.len() < before {
        warn!("Dropped {} rows without a location", before - table.len());
    }

    let mut lonlat = Vec::with_capacity(table.len());
    for row in table.rows() {
        let point = match source {
            Source::Wkt(idx) => wkt_point(&row[idx]).note(diag, ErrorCode::ConvertWkt)?,
            Source::LatLon(lat, lon) => {
                let lat = coordinate(&row[lat]).note(diag, ErrorCode::CsvGeometry)?;
                let lon = coordinate(&row[lon]).note(diag, ErrorCode::CsvGeometry)?;
                Point::new(lon, lat)
            }
        };
        lonlat.push(point);
    }
    if let Source::Wkt(_) = source {
        let name = config.geometry_column.clone();
        table.drop_column(&name);
    }

    let mut plane = Vec::with_capacity(lonlat.len());
    for point in &lonlat {
        match to_plane(&Geometry::Point(*point), SourceCrs::Geographic, zone).note(diag, ErrorCode::MergeGeometry)? {
            Geometry::Point(p) => plane.push([p.x(), p.y()]),
            other => {
                return Err(LinkageError::Geometry(format!(
                    "projection changed a point into {:?}",
                    other
                )))
            }
        }
    }
    debug!("Located {} points in {}", plane.len(), zone);
    Ok(PointSet { table, lonlat, plane })
}

fn wkt_point(text: &str) -> Result<Point<f64>> {
    match parse_wkt(text)? {
        Geometry::Point(p) => Ok(p),
        _ => Err(LinkageError::Format(format!("'{}' is not a POINT", text.trim()))),
    }
}

fn coordinate(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LinkageError::DataQuality(format!("coordinate '{}' is not a number", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::from_rows(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_lat_lon_points_and_empty_rows() {
        let t = table(
            &["id", "lat_geocoding", "lon_geocoding"],
            &[&["a", "35.68", "139.76"], &["b", "", ""]],
        );
        let zone = PlaneZone::new(9).unwrap();
        let points = extract_points(t, &SpatialConfig::default(), zone, &mut Diagnostics::new()).unwrap();
        assert_eq!(points.table.len(), 1);
        assert_eq!(points.lonlat[0], Point::new(139.76, 35.68));
        assert!(points.plane[0][0].abs() < 10_000.0);
    }

    #[test]
    fn test_wkt_column_wins_and_is_removed() {
        let t = table(&["id", "geometry"], &[&["a", "POINT(139.76 35.68)"]]);
        let zone = PlaneZone::new(9).unwrap();
        let points = extract_points(t, &SpatialConfig::default(), zone, &mut Diagnostics::new()).unwrap();
        assert!(!points.table.has_column("geometry"));
        assert_eq!(points.lonlat[0], Point::new(139.76, 35.68));
    }

    #[test]
    fn test_error_codes() {
        let zone = PlaneZone::new(9).unwrap();
        let mut diag = Diagnostics::new();
        let t = table(&["id"], &[&["a"]]);
        assert!(extract_points(t, &SpatialConfig::default(), zone, &mut diag).is_err());
        assert_eq!(diag.code(), Some(ErrorCode::GeometryColumns));

        let mut diag = Diagnostics::new();
        let t = table(&["lat_geocoding", "lon_geocoding"], &[&["north", "139.7"]]);
        let err = extract_points(t, &SpatialConfig::default(), zone, &mut diag).unwrap_err();
        assert!(matches!(err, LinkageError::DataQuality(_)));
        assert_eq!(diag.code(), Some(ErrorCode::CsvGeometry));

        let mut diag = Diagnostics::new();
        let t = table(&["geometry"], &[&["POINT(1"]]);
        assert!(extract_points(t, &SpatialConfig::default(), zone, &mut diag).is_err());
        assert_eq!(diag.code(), Some(ErrorCode::ConvertWkt));
    }
}
