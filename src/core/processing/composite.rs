//! Cloud-masked median composites for Sentinel-2 and Landsat collections.
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{
    Backend, DateRange, Geometry, ImageCollection, MaskRule, RasterImage, SCENE_INDEX,
};
use crate::core::bands::BandSet;
use crate::error::Result;
use crate::types::{ImageSource, ProcessingLevel, SensorProduct};

/// Band of the Sentinel-2 cloud probability collection.
pub const CLOUD_PROBABILITY_BAND: &str = "probability";
/// Landsat Collection 2 quality band; bit 3 flags cloud.
pub const QA_BAND: &str = "QA_PIXEL";
pub const QA_CLOUD_BIT: u8 = 3;

/// Collection 2 Level-2 scale factors.
pub const OPTICAL_GAIN: f64 = 0.0000275;
pub const OPTICAL_OFFSET: f64 = -0.2;
pub const THERMAL_GAIN: f64 = 0.00341802;
pub const THERMAL_OFFSET: f64 = 149.0;

/// Scene properties copied from the first contributing scene.
pub const CARRIED_PROPERTIES: [&str; 3] = ["SPACECRAFT_ID", "LANDSAT_PRODUCT_ID", "system:asset_id"];

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRequest {
    pub product: SensorProduct,
    pub region: Geometry,
    pub dates: DateRange,
    /// Sentinel-2 only: pixels with cloud probability at or above this are masked.
    pub max_cloud_probability: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneMetadata {
    pub spacecraft_id: Option<String>,
    pub product_id: Option<String>,
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Composite<I> {
    pub image: I,
    pub product: SensorProduct,
    pub scene_count: usize,
    pub metadata: SceneMetadata,
}

impl<I: RasterImage> Composite<I> {
    pub fn bands(&self) -> BandSet {
        self.image.band_set()
    }

    pub fn source(&self) -> ImageSource {
        self.product.source()
    }
}

pub struct CompositeBuilder<'a, B: Backend> {
    backend: &'a B,
}

impl<'a, B: Backend> CompositeBuilder<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Build the composite; `Ok(None)` when no scene matches the filters.
    pub fn build(&self, request: &CompositeRequest) -> Result<Option<Composite<B::Image>>> {
        let product = request.product;
        let collection = self
            .backend
            .collection(product.collection_id())?
            .filter_bounds(&request.region)
            .filter_date(&request.dates);
        info!(
            "{}: {} scene(s) between {} and {}",
            product,
            collection.len(),
            request.dates.start,
            request.dates.end
        );
        if collection.is_empty() {
            return Ok(None);
        }
        let mut scene_count = collection.len();

        let (image, metadata) = match product.source() {
            ImageSource::Sentinel2 => {
                let masked = self.sentinel2_masked(collection, request)?;
                scene_count = masked.len();
                match masked.median()? {
                    Some(image) => (image, SceneMetadata::default()),
                    None => return Ok(None),
                }
            }
            ImageSource::Landsat => {
                let cloud_mask = MaskRule::BitClear {
                    band: QA_BAND.to_string(),
                    bit: QA_CLOUD_BIT,
                };
                let masked = collection.map(|img| img.update_mask(&cloud_mask))?;
                let Some(median) = masked.median()? else {
                    return Ok(None);
                };
                let median = match product.processing_level() {
                    ProcessingLevel::SurfaceReflectance => apply_scale_factors(&median)?,
                    ProcessingLevel::Toa => median,
                };
                carry_metadata(median, collection.first().as_ref())
            }
        };

        debug!("Composite bands: {}", image.band_set());
        Ok(Some(Composite {
            image: image.clip(&request.region),
            product,
            scene_count,
            metadata,
        }))
    }

    /// Scenes with a cloud-probability partner, masked where the
    /// probability reaches the threshold. Scenes without a partner are dropped.
    fn sentinel2_masked(
        &self,
        collection: B::Collection,
        request: &CompositeRequest,
    ) -> Result<B::Collection> {
        let Some(probability_id) = request.product.cloud_probability_collection() else {
            return Ok(collection);
        };
        let probability = self
            .backend
            .collection(probability_id)?
            .filter_bounds(&request.region)
            .filter_date(&request.dates);
        let threshold = request.max_cloud_probability;

        let joined = collection.join_bands(&probability, SCENE_INDEX)?;
        if joined.len() < collection.len() {
            debug!(
                "Dropped {} scene(s) without cloud probability",
                collection.len() - joined.len()
            );
        }
        joined.map(|img| {
            let bands = img.band_names();
            let keep: Vec<&str> = bands
                .iter()
                .map(String::as_str)
                .filter(|b| *b != CLOUD_PROBABILITY_BAND)
                .collect();
            img.update_mask(&MaskRule::LessThan {
                band: CLOUD_PROBABILITY_BAND.to_string(),
                threshold,
            })?
            .select(&keep)
        })
    }
}

/// Rescale Level-2 digital numbers to reflectance (`SR_B*`) and Kelvin
/// (`ST_B*`). Apply once, after compositing, and only to surface-reflectance
/// products; TOA images are already in physical units.
pub fn apply_scale_factors<I: RasterImage>(image: &I) -> Result<I> {
    let names = image.band_names();
    let mut scaled = image.clone();
    for (prefix, gain, offset) in [
        ("SR_B", OPTICAL_GAIN, OPTICAL_OFFSET),
        ("ST_B", THERMAL_GAIN, THERMAL_OFFSET),
    ] {
        let bands: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|b| b.starts_with(prefix))
            .collect();
        if bands.is_empty() {
            continue;
        }
        debug!("Scaling {:?} by {} + {}", bands, gain, offset);
        let rescaled = image.select(&bands)?.affine(gain, offset);
        scaled = scaled.add_bands(&rescaled, true)?;
    }
    Ok(scaled)
}

fn carry_metadata<I: RasterImage>(mut image: I, first: Option<&I>) -> (I, SceneMetadata) {
    let Some(first) = first else {
        return (image, SceneMetadata::default());
    };
    for key in CARRIED_PROPERTIES {
        if let Some(value) = first.property(key) {
            image = image.with_property(key, value);
        }
    }
    let text = |key: &str| match first.property(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    let metadata = SceneMetadata {
        spacecraft_id: text(CARRIED_PROPERTIES[0]),
        product_id: text(CARRIED_PROPERTIES[1]),
        asset_id: text(CARRIED_PROPERTIES[2]),
    };
    debug!("Carried scene metadata {:?}", metadata);
    (image, metadata)
}
