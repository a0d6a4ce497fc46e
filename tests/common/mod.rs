#![allow(dead_code)]

use std::collections::BTreeMap;

use bandwise::backend::memory::{GridTransform, MemoryImage};
use bandwise::backend::{Bounds, Geometry, SCENE_INDEX, TIME_START};
use chrono::NaiveDate;
use ndarray::Array2;
use serde_json::Value;

pub const ROWS: usize = 10;
pub const COLS: usize = 10;

/// 10 x 10 grid of 30 m pixels with its top-left corner at (0, 300).
pub fn landsat_grid() -> GridTransform {
    GridTransform::new(0.0, 300.0, 30.0)
}

/// 10 x 10 grid of 10 m pixels with its top-left corner at (0, 100).
pub fn sentinel_grid() -> GridTransform {
    GridTransform::new(0.0, 100.0, 10.0)
}

pub fn footprint(grid: GridTransform) -> Geometry {
    Geometry::rectangle(grid.bounds(ROWS, COLS))
}

pub fn far_away() -> Geometry {
    Geometry::rectangle(Bounds::new(10_000.0, 10_000.0, 10_100.0, 10_100.0))
}

pub fn constant(grid: GridTransform, bands: &[(&str, f64)]) -> MemoryImage {
    MemoryImage::constant(grid, ROWS, COLS, bands).unwrap()
}

pub fn from_fn<F>(grid: GridTransform, names: &[&str], f: F) -> MemoryImage
where
    F: Fn(usize, usize, usize) -> f64,
{
    let bands = names
        .iter()
        .enumerate()
        .map(|(b, name)| {
            (
                name.to_string(),
                Array2::from_shape_fn((ROWS, COLS), |(r, c)| f(b, r, c)),
            )
        })
        .collect();
    MemoryImage::from_bands(grid, bands).unwrap()
}

pub fn millis(date: &str) -> i64 {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

/// Stamp a scene id, acquisition date and extra numeric/string properties.
pub fn scene(image: MemoryImage, id: &str, date: &str, extra: &[(&str, Value)]) -> MemoryImage {
    let mut properties = BTreeMap::new();
    properties.insert(SCENE_INDEX.to_string(), Value::from(id));
    properties.insert(TIME_START.to_string(), Value::from(millis(date)));
    for (key, value) in extra {
        properties.insert(key.to_string(), value.clone());
    }
    image.with_properties(properties)
}

pub const L89_SR_BANDS: [&str; 9] = [
    "SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7", "ST_B10", "QA_PIXEL",
];
pub const L7_SR_BANDS: [&str; 8] = [
    "SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7", "ST_B6", "QA_PIXEL",
];
pub const L89_TOA_BANDS: [&str; 12] = [
    "B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B9", "B10", "B11", "QA_PIXEL",
];
pub const S2_BANDS: [&str; 6] = ["B2", "B3", "B4", "B8", "B11", "B12"];

/// Every band of `names` at `value`, except the overrides.
pub fn uniform(grid: GridTransform, names: &[&str], value: f64, overrides: &[(&str, f64)]) -> MemoryImage {
    let bands: Vec<(&str, f64)> = names
        .iter()
        .map(|&name| {
            let v = overrides
                .iter()
                .find(|(n, _)| *n == name)
                .map_or(value, |(_, v)| *v);
            (name, v)
        })
        .collect();
    constant(grid, &bands)
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}
