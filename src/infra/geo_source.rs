//! Readers for polygon sources: zipped shapefile bundles, bare shapefiles,
//! GeoPackage, GeoJSON and CSV with a WKT column.

use geo::{Coord, Geometry, LineString, MultiPolygon, Point, Polygon};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Shape};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wkt::TryFromWkt;

use super::tabular::{extension, read_table};
use super::wkb::decode_gpkg_geometry;
use crate::error::{Diagnostics, ErrorCode, LinkageError, Result, ResultExt};
use crate::pipeline::processing::crs::{PlaneZone, SourceCrs};
use crate::table::Table;

const BUNDLE_MEMBERS: [&str; 4] = ["shp", "shx", "dbf", "prj"];

static EPSG_AUTHORITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"AUTHORITY\s*\[\s*"EPSG"\s*,\s*"(\d+)"\s*\]"#).expect("authority pattern"));
static ZONE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:zone|CS)[_ ]+([IVX]+|\d{1,2})\b").expect("zone pattern")
});
static TRAILING_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*$").expect("code pattern"));

/// Attributes and geometries read from one source, row-aligned
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub attributes: Table,
    pub geometries: Vec<Geometry<f64>>,
    pub crs: SourceCrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFormat {
    ShapefileBundle,
    Shapefile,
    GeoPackage,
    GeoJson,
    Csv,
}

impl GeometryFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match extension(path).as_str() {
            "zip" => Ok(GeometryFormat::ShapefileBundle),
            "shp" => Ok(GeometryFormat::Shapefile),
            "gpkg" => Ok(GeometryFormat::GeoPackage),
            "geojson" | "json" => Ok(GeometryFormat::GeoJson),
            "csv" => Ok(GeometryFormat::Csv),
            other => Err(LinkageError::Format(format!(
                "{} has unsupported geometry extension '{}'",
                path.display(),
                other
            ))),
        }
    }
}

/// Read a polygon source. `geometry_column` names the WKT column of CSV input.
pub fn read_features(path: &Path, geometry_column: &str, diag: &mut Diagnostics) -> Result<FeatureSet> {
    let format = GeometryFormat::from_path(path).note(diag, ErrorCode::AllowedExtension)?;
    debug!("Reading {} as {:?}", path.display(), format);
    let features = match format {
        GeometryFormat::ShapefileBundle => read_bundle(path, diag)?,
        GeometryFormat::Shapefile => read_shapefile(path)?,
        GeometryFormat::GeoPackage => read_geopackage(path)?,
        GeometryFormat::GeoJson => read_geojson(path)?,
        GeometryFormat::Csv => read_wkt_csv(path, geometry_column, diag)?,
    };
    info!(
        "Loaded {} features from {} ({:?})",
        features.geometries.len(),
        path.display(),
        features.crs
    );
    Ok(features)
}

fn read_bundle(path: &Path, diag: &mut Diagnostics) -> Result<FeatureSet> {
    let scratch = tempfile::tempdir()?;
    let members = extract_bundle(path, scratch.path())?;
    let missing: Vec<&str> = BUNDLE_MEMBERS
        .iter()
        .copied()
        .filter(|ext| !members.contains_key(*ext))
        .collect();
    if !missing.is_empty() {
        let err = LinkageError::Format(format!(
            "{} lacks shapefile members: {}",
            path.display(),
            missing.join(", ")
        ));
        diag.note(ErrorCode::DataFormat, err.to_string());
        return Err(err);
    }
    read_shapefile(&members["shp"])
}

/// Extract the archive flat into `dest`, returning the first member per extension.
fn extract_bundle(path: &Path, dest: &Path) -> Result<HashMap<String, PathBuf>> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut names: Vec<(String, usize)> = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if !entry.is_dir() {
            names.push((entry.name().to_string(), i));
        }
    }
    names.sort();

    let mut members = HashMap::new();
    for (name, index) in names {
        let file_name = match Path::new(&name).file_name() {
            Some(f) => f.to_owned(),
            None => continue,
        };
        let member_path = dest.join(&file_name);
        let ext = extension(&member_path);
        if !BUNDLE_MEMBERS.contains(&ext.as_str()) || members.contains_key(&ext) {
            continue;
        }
        let mut entry = archive.by_index(index)?;
        let mut out = File::create(&member_path)?;
        io::copy(&mut entry, &mut out)?;
        members.insert(ext, member_path);
    }
    Ok(members)
}

fn read_shapefile(shp: &Path) -> Result<FeatureSet> {
    let crs = read_prj(&shp.with_extension("prj"));
    let mut reader = shapefile::Reader::from_path(shp)?;

    let mut records: Vec<HashMap<String, String>> = Vec::new();
    let mut geometries = Vec::new();
    let mut columns: BTreeSet<String> = BTreeSet::new();
    let mut skipped = 0usize;
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item?;
        let geometry = match shape_to_geometry(shape) {
            Some(g) => g,
            None => {
                skipped += 1;
                continue;
            }
        };
        let mut values = HashMap::new();
        for (name, value) in record {
            columns.insert(name.clone());
            values.insert(name, field_to_string(&value));
        }
        records.push(values);
        geometries.push(geometry);
    }
    if skipped > 0 {
        warn!("Skipped {} empty or non-areal shapes in {}", skipped, shp.display());
    }

    let headers: Vec<String> = columns.into_iter().collect();
    let rows = records
        .into_iter()
        .map(|mut values| {
            headers
                .iter()
                .map(|h| values.remove(h).unwrap_or_default())
                .collect()
        })
        .collect();
    Ok(FeatureSet {
        attributes: Table::from_rows(headers, rows),
        geometries,
        crs,
    })
}

fn field_to_string(value: &FieldValue) -> String {
    match value {
        FieldValue::Character(Some(s)) => s.trim().to_string(),
        FieldValue::Memo(s) => s.trim().to_string(),
        FieldValue::Numeric(Some(n)) => n.to_string(),
        FieldValue::Float(Some(n)) => n.to_string(),
        FieldValue::Integer(n) => n.to_string(),
        FieldValue::Double(n) => n.to_string(),
        FieldValue::Logical(Some(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn rings_to_geometry<P>(rings: &[PolygonRing<P>], xy: impl Fn(&P) -> Coord<f64>) -> Geometry<f64> {
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for ring in rings {
        let line = LineString::new(ring.points().iter().map(&xy).collect());
        match ring {
            PolygonRing::Outer(_) => polygons.push(Polygon::new(line, vec![])),
            PolygonRing::Inner(_) => {
                if let Some(last) = polygons.last_mut() {
                    last.interiors_push(line);
                }
            }
        }
    }
    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(MultiPolygon::new(polygons))
    }
}

fn shape_to_geometry(shape: Shape) -> Option<Geometry<f64>> {
    match shape {
        Shape::Point(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointM(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointZ(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::Polygon(p) => Some(rings_to_geometry(p.rings(), |pt: &shapefile::Point| Coord { x: pt.x, y: pt.y })),
        Shape::PolygonM(p) => Some(rings_to_geometry(p.rings(), |pt: &shapefile::PointM| Coord { x: pt.x, y: pt.y })),
        Shape::PolygonZ(p) => Some(rings_to_geometry(p.rings(), |pt: &shapefile::PointZ| Coord { x: pt.x, y: pt.y })),
        _ => None,
    }
}

fn read_prj(path: &Path) -> SourceCrs {
    match fs::read_to_string(path) {
        Ok(text) => crs_from_prj(&text),
        Err(_) => SourceCrs::Unknown,
    }
}

/// Coordinate reference described by a `.prj` (ESRI WKT1) document.
pub fn crs_from_prj(text: &str) -> SourceCrs {
    if let Some(code) = EPSG_AUTHORITY
        .captures_iter(text)
        .last()
        .and_then(|c| c[1].parse::<u32>().ok())
    {
        let crs = SourceCrs::from_epsg(code);
        if crs != SourceCrs::Unknown {
            return crs;
        }
    }
    if text.trim_start().starts_with("PROJCS") {
        if !text.contains("Transverse_Mercator") && !text.contains("Japan") {
            return SourceCrs::Unknown;
        }
        return ZONE_NUMBER
            .captures(text)
            .and_then(|c| zone_number(&c[1]))
            .and_then(|n| PlaneZone::new(n).ok())
            .map(SourceCrs::Plane)
            .unwrap_or(SourceCrs::Unknown);
    }
    if text.trim_start().starts_with("GEOGCS") {
        return SourceCrs::Geographic;
    }
    SourceCrs::Unknown
}

fn zone_number(token: &str) -> Option<u8> {
    if let Ok(n) = token.parse::<u8>() {
        return Some(n);
    }
    let value = |c: char| match c.to_ascii_uppercase() {
        'I' => Some(1i32),
        'V' => Some(5),
        'X' => Some(10),
        _ => None,
    };
    let digits: Vec<i32> = token.chars().map(value).collect::<Option<_>>()?;
    let mut total = 0;
    for (i, d) in digits.iter().enumerate() {
        if digits.get(i + 1).is_some_and(|next| next > d) {
            total -= d;
        } else {
            total += d;
        }
    }
    u8::try_from(total).ok()
}

fn read_geopackage(path: &Path) -> Result<FeatureSet> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let (table_name, column, srs_id): (String, String, i64) = conn.query_row(
        "SELECT table_name, column_name, srs_id FROM gpkg_geometry_columns ORDER BY table_name LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let crs = if srs_id > 0 {
        SourceCrs::from_epsg(srs_id as u32)
    } else {
        SourceCrs::Unknown
    };

    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table_name.replace('"', "\"\"")))?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let geometry_idx = names
        .iter()
        .position(|n| *n == column)
        .ok_or_else(|| LinkageError::Schema(format!("geometry column '{}' not found", column)))?;
    let headers: Vec<String> = names
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != geometry_idx)
        .map(|(_, n)| n.clone())
        .collect();

    let mut attributes = Table::new(headers);
    let mut geometries = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let geometry = match row.get_ref(geometry_idx)? {
            ValueRef::Blob(blob) => decode_gpkg_geometry(blob)?,
            _ => None,
        };
        let geometry = match geometry {
            Some(g) => g,
            None => continue,
        };
        let mut values = Vec::with_capacity(names.len() - 1);
        for i in (0..names.len()).filter(|i| *i != geometry_idx) {
            values.push(match row.get_ref(i)? {
                ValueRef::Null | ValueRef::Blob(_) => String::new(),
                ValueRef::Integer(v) => v.to_string(),
                ValueRef::Real(v) => v.to_string(),
                ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
            });
        }
        attributes.push_row(values);
        geometries.push(geometry);
    }
    Ok(FeatureSet {
        attributes,
        geometries,
        crs,
    })
}

fn read_geojson(path: &Path) -> Result<FeatureSet> {
    let document: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let crs = document
        .pointer("/crs/properties/name")
        .and_then(Value::as_str)
        .map(crs_from_name)
        .unwrap_or(SourceCrs::Geographic);

    let features: Vec<&Value> = match document.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => document
            .get("features")
            .and_then(Value::as_array)
            .map(|f| f.iter().collect())
            .unwrap_or_default(),
        Some("Feature") => vec![&document],
        _ => {
            return Err(LinkageError::Format(format!(
                "{} is not a GeoJSON feature collection",
                path.display()
            )))
        }
    };

    let mut columns: BTreeSet<String> = BTreeSet::new();
    let mut records = Vec::new();
    let mut geometries = Vec::new();
    for feature in features {
        let geometry = match feature.get("geometry").filter(|g| !g.is_null()) {
            Some(g) => geojson_geometry(g)?,
            None => continue,
        };
        let mut values = HashMap::new();
        if let Some(props) = feature.get("properties").and_then(Value::as_object) {
            for (key, value) in props {
                columns.insert(key.clone());
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                values.insert(key.clone(), text);
            }
        }
        records.push(values);
        geometries.push(geometry);
    }

    let headers: Vec<String> = columns.into_iter().collect();
    let rows = records
        .into_iter()
        .map(|mut values: HashMap<String, String>| {
            headers
                .iter()
                .map(|h| values.remove(h).unwrap_or_default())
                .collect()
        })
        .collect();
    Ok(FeatureSet {
        attributes: Table::from_rows(headers, rows),
        geometries,
        crs,
    })
}

fn crs_from_name(name: &str) -> SourceCrs {
    if name.contains("CRS84") {
        return SourceCrs::Geographic;
    }
    TRAILING_CODE
        .captures(name)
        .and_then(|c| c[1].parse::<u32>().ok())
        .map(SourceCrs::from_epsg)
        .unwrap_or(SourceCrs::Unknown)
}

fn geojson_position(value: &Value) -> Result<Coord<f64>> {
    let parts = value
        .as_array()
        .filter(|p| p.len() >= 2)
        .ok_or_else(|| LinkageError::Format("GeoJSON position needs two numbers".into()))?;
    match (parts[0].as_f64(), parts[1].as_f64()) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(LinkageError::Format("GeoJSON position is not numeric".into())),
    }
}

fn geojson_ring(value: &Value) -> Result<LineString<f64>> {
    let positions = value
        .as_array()
        .ok_or_else(|| LinkageError::Format("GeoJSON ring is not an array".into()))?;
    Ok(LineString::new(
        positions.iter().map(geojson_position).collect::<Result<_>>()?,
    ))
}

fn geojson_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value
        .as_array()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| LinkageError::Format("GeoJSON polygon has no rings".into()))?;
    let exterior = geojson_ring(&rings[0])?;
    let interiors = rings[1..].iter().map(geojson_ring).collect::<Result<_>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn geojson_geometry(value: &Value) -> Result<Geometry<f64>> {
    let coordinates = value
        .get("coordinates")
        .ok_or_else(|| LinkageError::Format("GeoJSON geometry has no coordinates".into()))?;
    match value.get("type").and_then(Value::as_str) {
        Some("Point") => Ok(Geometry::Point(Point::from(geojson_position(coordinates)?))),
        Some("Polygon") => Ok(Geometry::Polygon(geojson_polygon(coordinates)?)),
        Some("MultiPolygon") => {
            let polygons = coordinates
                .as_array()
                .ok_or_else(|| LinkageError::Format("MultiPolygon coordinates must be an array".into()))?
                .iter()
                .map(geojson_polygon)
                .collect::<Result<_>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        other => Err(LinkageError::Format(format!(
            "unsupported GeoJSON geometry type {:?}",
            other
        ))),
    }
}

/// Parse one WKT value into a geometry.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from_wkt_str(text.trim())
        .map_err(|e| LinkageError::Format(format!("invalid WKT '{}': {}", abbreviate(text), e)))
}

fn abbreviate(text: &str) -> String {
    text.chars().take(40).collect()
}

fn read_wkt_csv(path: &Path, geometry_column: &str, diag: &mut Diagnostics) -> Result<FeatureSet> {
    let mut table = read_table(path).note(diag, ErrorCode::SpatialEncoding)?;
    let idx = table
        .column_index(geometry_column)
        .ok_or_else(|| {
            LinkageError::Format(format!(
                "{} has no '{}' geometry column",
                path.display(),
                geometry_column
            ))
        })
        .note(diag, ErrorCode::GeometryColumns)?;
    table.retain_rows(|row| !row[idx].trim().is_empty());

    let geometries = table
        .column_values(idx)
        .map(parse_wkt)
        .collect::<Result<Vec<_>>>()
        .note(diag, ErrorCode::ConvertWkt)?;
    if geometries.is_empty() {
        let err = LinkageError::Format(format!("{} has no geometry values", path.display()));
        diag.note(ErrorCode::CsvGeometry, err.to_string());
        return Err(err);
    }
    table.drop_column(geometry_column);
    Ok(FeatureSet {
        attributes: table,
        geometries,
        crs: SourceCrs::Geographic,
    })
}
