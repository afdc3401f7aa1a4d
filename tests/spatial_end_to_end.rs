use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use residence_link::app::SpatialUseCase;
use residence_link::config::RunConfig;
use residence_link::pipeline::crs::PlaneZone;
use residence_link::pipeline::spatial::SpatialOutcome;
use residence_link::table::Table;

const PLANE_CRS: &str = "urn:ogc:def:crs:EPSG::6677";

fn square(x0: f64, y0: f64, side: f64) -> Value {
    json!([[
        [x0, y0],
        [x0 + side, y0],
        [x0 + side, y0 + side],
        [x0, y0 + side],
        [x0, y0]
    ]])
}

fn write_collection(path: &Path, features: Vec<Value>) {
    let document = json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": PLANE_CRS } },
        "features": features,
    });
    fs::write(path, document.to_string()).unwrap();
}

/// Buildings of area 500 at the given plane x offsets, ids in order
fn write_buildings(dir: &Path, ids_and_x: &[(&str, f64)]) -> PathBuf {
    let path = dir.join("buildings.geojson");
    let features = ids_and_x
        .iter()
        .map(|(id, x)| {
            json!({
                "type": "Feature",
                "properties": { "building_id": id, "floors": 2 },
                "geometry": { "type": "Polygon", "coordinates": square(*x, 0.0, 500f64.sqrt()) },
            })
        })
        .collect();
    write_collection(&path, features);
    path
}

fn write_areal_units(dir: &Path) -> PathBuf {
    let path = dir.join("areal_units.geojson");
    write_collection(
        &path,
        vec![json!({
            "type": "Feature",
            "properties": { "KEY_CODE": "131010010", "S_NAME": "丸の内" },
            "geometry": { "type": "Polygon", "coordinates": square(-100.0, -100.0, 50_000.0) },
        })],
    );
    path
}

/// Records located at plane coordinates of zone 9
fn points(records: &[(&str, f64, f64)]) -> Table {
    let tm = PlaneZone::new(9).unwrap().projection();
    Table::from_rows(
        vec!["meter_number".into(), "lat_geocoding".into(), "lon_geocoding".into()],
        records
            .iter()
            .map(|(meter, x, y)| {
                let (lon, lat) = tm.inverse(*x, *y);
                vec![meter.to_string(), lat.to_string(), lon.to_string()]
            })
            .collect(),
    )
}

fn config() -> RunConfig {
    RunConfig::from_toml("[run]\nregion = \"東京都\"\nmunicipality = \"千代田区\"\n").unwrap()
}

fn assign(dir: &Path, buildings: &Path, records: &[(&str, f64, f64)], seed: u64) -> SpatialOutcome {
    let config = config();
    SpatialUseCase::new(&config)
        .assign(points(records), buildings, &write_areal_units(dir), StdRng::seed_from_u64(seed))
        .unwrap()
}

fn column<'a>(table: &'a Table, name: &str) -> Vec<&'a str> {
    table.column_values(table.column_index(name).unwrap()).collect()
}

#[test]
fn test_near_point_assigned_far_point_not() {
    let dir = tempfile::tempdir().unwrap();
    let buildings = write_buildings(dir.path(), &[("A", 0.0)]);
    let outcome = assign(dir.path(), &buildings, &[("m1", 12.0, 12.0), ("m2", 10_011.18, 11.18)], 1);

    assert_eq!(outcome.join_ratio, 50.0);
    assert_eq!(outcome.assigned_points, 1);
    let t = &outcome.table;
    assert_eq!(column(t, "building_id"), vec!["A", ""]);
    assert_eq!(column(t, "floors_building"), vec!["2", ""]);
    assert_eq!(column(t, "key_code")[0], "131010010");
    assert_eq!(column(t, "area_name")[0], "丸の内");
    assert!(column(t, "building_geometry")[0].starts_with("POLYGON"));
    assert!(column(t, "geometry")[1].starts_with("POINT"));
    assert_eq!(column(t, "meter_number"), vec!["m1", "m2"]);
}

#[test]
fn test_assignment_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let buildings = write_buildings(dir.path(), &[("A", 0.0), ("B", 30.0), ("C", 60.0)]);
    let records = [
        ("m1", 12.0, 12.0),
        ("m2", 25.0, 10.0),
        ("m3", 40.0, 12.0),
        ("m4", 70.0, 10.0),
        ("m5", 500.0, 500.0),
    ];
    let first = assign(dir.path(), &buildings, &records, 1);
    let second = assign(dir.path(), &buildings, &records, 99);
    assert_eq!(
        column(&first.table, "building_id"),
        column(&second.table, "building_id")
    );
    assert_eq!(first.join_ratio, second.join_ratio);
}

#[test]
fn test_residence_ids_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<String> = (0..40).map(|i| format!("B{}", i)).collect();
    let layout: Vec<(&str, f64)> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i as f64 * 100.0)).collect();
    let buildings = write_buildings(dir.path(), &layout);
    let meters: Vec<String> = (0..40).map(|i| format!("m{}", i)).collect();
    let records: Vec<(&str, f64, f64)> = meters
        .iter()
        .enumerate()
        .map(|(i, m)| (m.as_str(), i as f64 * 100.0 + 11.0, 11.0))
        .collect();

    let outcome = assign(dir.path(), &buildings, &records, 5);
    let residence_ids = column(&outcome.table, "residence_id");
    assert_eq!(residence_ids.len(), 40);
    assert!(residence_ids.iter().all(|id| !id.is_empty()));
    let distinct: HashSet<&str> = residence_ids.iter().copied().collect();
    assert_eq!(distinct.len(), residence_ids.len());
}

#[test]
fn test_multi_unit_building_is_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let buildings = write_buildings(dir.path(), &[("A", 0.0), ("B", 1_000.0)]);
    let records = [
        ("m1", 12.0, 12.0),
        ("m2", 10.0, 11.0),
        ("m3", 11.0, 13.0),
        ("m4", 1_012.0, 12.0),
        ("m5", 1_010.0, 11.0),
    ];
    let outcome = assign(dir.path(), &buildings, &records, 7);

    assert_eq!(outcome.multi_unit_excluded, 1);
    let ids = column(&outcome.table, "building_id");
    assert!(!ids.contains(&"A"));
    assert!(ids.contains(&"B"));
}
