//! JSON scene files and catalogs for the in-memory backend.
//!
//! A scene is a small dense raster with its bands, optional validity mask,
//! acquisition date and properties. A catalog maps collection ids to scenes and
//! asset ids to nearest-centroid classifier models.
use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::memory::{CentroidClassifier, GridTransform, MemoryBackend, MemoryImage};
use crate::backend::{SCENE_INDEX, TIME_START};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBand {
    pub name: String,
    /// Row-major pixel values.
    pub values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub transform: GridTransform,
    pub bands: Vec<SceneBand>,
    #[serde(default)]
    pub mask: Option<Vec<Vec<bool>>>,
    /// Acquisition date, `YYYY-MM-DD`.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl SceneSpec {
    pub fn into_image(self) -> Result<MemoryImage> {
        let mut bands = Vec::with_capacity(self.bands.len());
        for band in self.bands {
            let plane = to_array(&band.name, band.values)?;
            bands.push((band.name, plane));
        }
        let mut image = MemoryImage::from_bands(self.transform, bands)?;
        if let Some(mask) = self.mask {
            image = image.with_mask(to_array("mask", mask)?)?;
        }

        let mut properties = self.properties;
        if let Some(id) = self.id {
            properties.entry(SCENE_INDEX.to_string()).or_insert(Value::String(id));
        }
        if let Some(date) = self.date {
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")?;
            let millis = date
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc().timestamp_millis())
                .ok_or_else(|| Error::InvalidArgument {
                    arg: "date",
                    value: date.to_string(),
                })?;
            properties.insert(TIME_START.to_string(), Value::from(millis));
        }
        Ok(image.with_properties(properties))
    }
}

fn to_array<T: Clone>(name: &str, rows: Vec<Vec<T>>) -> Result<Array2<T>> {
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    if height == 0 || width == 0 || rows.iter().any(|r| r.len() != width) {
        return Err(Error::InvalidArgument {
            arg: "scene",
            value: format!("{name} is not a non-empty rectangular grid"),
        });
    }
    let flat: Vec<T> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((height, width), flat).map_err(Error::backend)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<SceneSpec>>,
    #[serde(default)]
    pub models: BTreeMap<String, CentroidClassifier>,
}

impl Catalog {
    pub fn into_backend(self) -> Result<MemoryBackend> {
        let mut backend = MemoryBackend::new();
        for (id, scenes) in self.collections {
            let images = scenes
                .into_iter()
                .map(SceneSpec::into_image)
                .collect::<Result<Vec<_>>>()?;
            backend.insert_collection(id, images);
        }
        for (asset_id, model) in self.models {
            debug!("Registering classifier {}", asset_id);
            backend.register_model(asset_id, model)?;
        }
        Ok(backend)
    }
}

pub fn read_scene(path: &Path) -> Result<MemoryImage> {
    let text = std::fs::read_to_string(path)?;
    let spec: SceneSpec = serde_json::from_str(&text)?;
    debug!("Read scene {:?} with {} bands", path, spec.bands.len());
    spec.into_image()
}

pub fn load_catalog(path: &Path) -> Result<MemoryBackend> {
    let text = std::fs::read_to_string(path)?;
    let catalog: Catalog = serde_json::from_str(&text)?;
    info!(
        "Loaded catalog {:?}: {} collection(s), {} model(s)",
        path,
        catalog.collections.len(),
        catalog.models.len()
    );
    catalog.into_backend()
}
