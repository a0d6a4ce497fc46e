//! Regional mean NDVI per scene, for plotting over time.
use std::sync::mpsc;
use std::thread;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{Backend, DateRange, Geometry, ImageCollection, RasterImage, Reducer};
use crate::core::params::TimeSeriesDefaults;
use crate::core::recipes::{Formula, RecipeRegistry};
use crate::error::{Error, Result};
use crate::types::{ImageSource, SensorProduct, SpectralIndex};

pub const NDVI_BAND: &str = "NDVI";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NdviPoint {
    pub date: NaiveDate,
    pub ndvi: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRequest {
    pub product: SensorProduct,
    pub region: Geometry,
    pub dates: DateRange,
}

/// Mean NDVI of each of the least cloudy scenes, sorted by acquisition date.
///
/// Scenes without an acquisition date or without any valid pixel in the
/// region are skipped. `EmptyResult` when nothing is left.
pub fn ndvi_series<B: Backend>(
    backend: &B,
    registry: &RecipeRegistry,
    request: &SeriesRequest,
    defaults: &TimeSeriesDefaults,
) -> Result<Vec<NdviPoint>> {
    let product = request.product;
    let variant = product.expected_variant();
    let recipe = registry.spectral_index(variant, SpectralIndex::Ndvi)?;
    let Formula::NormalizedDifference { a, b } = &recipe.formula else {
        return Err(Error::unsupported(variant, recipe.kind, Some(NDVI_BAND)));
    };

    let cover = product.cloud_cover_property();
    let mut collection = backend
        .collection(product.collection_id())?
        .filter_date(&request.dates)
        .filter_bounds(&request.region);
    if product.source() == ImageSource::Sentinel2 {
        collection = collection.filter_lt(cover, defaults.max_cloudy_pixel_percentage);
    }
    let collection = collection.sort(cover, true).limit(defaults.limit);
    info!(
        "NDVI series for {} over {} scene(s) using {}/{}",
        product,
        collection.len(),
        a,
        b
    );

    let mut points = Vec::with_capacity(collection.len());
    for image in collection.images() {
        let Some(date) = image.acquisition_date() else {
            warn!("Skipping scene without acquisition time");
            continue;
        };
        let ndvi = image.normalized_difference(a, b)?.rename(&[NDVI_BAND])?;
        let means = ndvi
            .reduce_region(&Reducer::Mean, &request.region, defaults.scale, true)?
            .into_values()?;
        match means.get(NDVI_BAND) {
            Some(&value) if value.is_finite() => {
                debug!("{}: NDVI {:.4}", date, value);
                points.push(NdviPoint { date, ndvi: value });
            }
            _ => debug!("{}: no valid pixels in region", date),
        }
    }

    if points.is_empty() {
        return Err(Error::EmptyResult(format!(
            "no NDVI values for {} between {} and {}",
            product, request.dates.start, request.dates.end
        )));
    }
    points.sort_by_key(|p| p.date);
    Ok(points)
}

/// Running series extraction. The caller stays free to do other work and
/// collects the points with [`poll`](Self::poll) or [`wait`](Self::wait).
#[derive(Debug)]
pub struct SeriesTask {
    done: mpsc::Receiver<Result<Vec<NdviPoint>>>,
}

impl SeriesTask {
    /// `None` while the worker is still running.
    pub fn poll(&self) -> Option<Result<Vec<NdviPoint>>> {
        match self.done.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(worker_gone())),
        }
    }

    pub fn wait(self) -> Result<Vec<NdviPoint>> {
        self.done.recv().map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> Error {
    Error::Backend("NDVI series worker exited without reporting".to_string())
}

/// Run [`ndvi_series`] on a background thread.
pub fn spawn_ndvi_series<B>(
    backend: B,
    registry: RecipeRegistry,
    request: SeriesRequest,
    defaults: TimeSeriesDefaults,
) -> SeriesTask
where
    B: Backend + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = ndvi_series(&backend, &registry, &request, &defaults);
        if let Err(e) = &result {
            warn!("NDVI series failed: {}", e);
        }
        let _ = tx.send(result);
    });
    SeriesTask { done: rx }
}
