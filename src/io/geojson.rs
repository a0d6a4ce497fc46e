//! Region loading from GeoJSON. The region is the outer ring of the first
//! feature's Polygon or MultiPolygon geometry.
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::Geometry;
use crate::error::{Error, Result};

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    FeatureCollection { features: Vec<Feature> },
    Feature(Feature),
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

#[derive(Deserialize)]
struct Feature {
    geometry: Option<Value>,
}

pub fn read_region(path: &Path) -> Result<Geometry> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    let region = parse_region(&value)?;
    debug!(
        "Region from {:?}: {} vertices, bounds {:?}",
        path,
        region.exterior.len(),
        region.bounds()
    );
    Ok(region)
}

/// Accepts a FeatureCollection, a Feature, or a bare geometry.
pub fn parse_region(value: &Value) -> Result<Geometry> {
    let parsed: GeoJson = serde_json::from_value(value.clone()).map_err(|e| unsupported(&e))?;
    match parsed {
        GeoJson::FeatureCollection { features } => {
            let first = features.into_iter().next().ok_or_else(|| Error::InvalidArgument {
                arg: "region",
                value: "FeatureCollection has no features".to_string(),
            })?;
            feature_geometry(first)
        }
        GeoJson::Feature(feature) => feature_geometry(feature),
        GeoJson::Polygon { coordinates } => outer_ring(coordinates.into_iter().next()),
        GeoJson::MultiPolygon { coordinates } => {
            outer_ring(coordinates.into_iter().next().and_then(|p| p.into_iter().next()))
        }
    }
}

fn feature_geometry(feature: Feature) -> Result<Geometry> {
    match feature.geometry {
        Some(geometry) if !geometry.is_null() => parse_region(&geometry),
        _ => Err(Error::InvalidArgument {
            arg: "region",
            value: "feature has no geometry".to_string(),
        }),
    }
}

fn outer_ring(ring: Option<Vec<Vec<f64>>>) -> Result<Geometry> {
    let ring = ring.ok_or_else(|| Error::InvalidArgument {
        arg: "region",
        value: "polygon has no rings".to_string(),
    })?;
    let mut exterior = Vec::with_capacity(ring.len());
    for position in ring {
        match position.as_slice() {
            [x, y, ..] => exterior.push([*x, *y]),
            _ => {
                return Err(Error::InvalidArgument {
                    arg: "region",
                    value: format!("position {:?}", position),
                });
            }
        }
    }
    Geometry::polygon(exterior)
}

fn unsupported(e: &serde_json::Error) -> Error {
    Error::InvalidArgument {
        arg: "region",
        value: format!("expected Polygon or MultiPolygon GeoJSON: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_feature_polygon() {
        let fc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]
                }},
                {"type": "Feature", "properties": {}, "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[5, 5], [6, 5], [6, 6], [5, 5]]]
                }}
            ]
        });
        let region = parse_region(&fc).unwrap();
        assert_eq!(region.exterior.len(), 5);
        assert!(region.contains(0.5, 0.5));
    }

    #[test]
    fn multipolygon_uses_first_outer_ring() {
        let mp = json!({
            "type": "MultiPolygon",
            "coordinates": [[[[10, 10, 0], [20, 10, 0], [20, 20, 0], [10, 10, 0]]]]
        });
        let region = parse_region(&mp).unwrap();
        assert_eq!(region.exterior[1], [20.0, 10.0]);
    }

    #[test]
    fn empty_collection_and_points_are_rejected() {
        let empty = json!({"type": "FeatureCollection", "features": []});
        assert!(matches!(parse_region(&empty), Err(Error::InvalidArgument { .. })));
        let point = json!({"type": "Point", "coordinates": [1, 2]});
        assert!(parse_region(&point).is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aoi.geojson");
        std::fs::write(
            &path,
            r#"{"type":"Feature","properties":null,"geometry":{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,0]]]}}"#,
        )
        .unwrap();
        assert_eq!(read_region(&path).unwrap().exterior.len(), 4);
    }
}
