//! Raster backend collaborator interface.
//!
//! Per-pixel math, regional statistics, clustering, classification and export
//! are all delegated to a `Backend`. The decision layer in `core` only picks
//! which operation runs, on which bands, at which scale. `memory` holds an
//! in-process implementation on `ndarray`.
pub mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;

use chrono::{DateTime, NaiveDate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::bands::BandSet;
use crate::core::stretch::VisualizationParams;
use crate::error::{Error, Result};
use crate::types::ClusterAlgorithm;

/// Axis-aligned extent in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// A polygon region given by its outer ring. Holes are not modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub exterior: Vec<[f64; 2]>,
}

impl Geometry {
    pub fn polygon(exterior: Vec<[f64; 2]>) -> Result<Self> {
        if exterior.len() < 3 {
            return Err(Error::InvalidArgument {
                arg: "geometry",
                value: format!("ring with {} vertices", exterior.len()),
            });
        }
        Ok(Self { exterior })
    }

    pub fn rectangle(bounds: Bounds) -> Self {
        Self {
            exterior: vec![
                [bounds.min_x, bounds.min_y],
                [bounds.max_x, bounds.min_y],
                [bounds.max_x, bounds.max_y],
                [bounds.min_x, bounds.max_y],
                [bounds.min_x, bounds.min_y],
            ],
        }
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &[x, y] in &self.exterior {
            b.min_x = b.min_x.min(x);
            b.min_y = b.min_y.min(y);
            b.max_x = b.max_x.max(x);
            b.max_y = b.max_y.max(y);
        }
        b
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if !self.bounds().contains(x, y) {
            return false;
        }
        let ring = &self.exterior;
        let mut inside = false;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let [xi, yi] = ring[i];
            let [xj, yj] = ring[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidArgument {
                arg: "date range",
                value: format!("{start}..{end}"),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")?;
        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Regional statistic to compute.
#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    /// Keyed `{band}`.
    Mean,
    /// Keyed `{band}_min` and `{band}_max`.
    MinMax,
    /// Keyed `{band}_p{p}` for each requested percentile.
    Percentile(Vec<u8>),
    /// Band-by-band covariance of mean-centred values.
    CenteredCovariance,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    Values(BTreeMap<String, f64>),
    Matrix(Array2<f64>),
}

impl Reduction {
    pub fn into_values(self) -> Result<BTreeMap<String, f64>> {
        match self {
            Reduction::Values(v) => Ok(v),
            Reduction::Matrix(_) => Err(Error::Backend(
                "expected named values, got a matrix".to_string(),
            )),
        }
    }

    pub fn into_matrix(self) -> Result<Array2<f64>> {
        match self {
            Reduction::Matrix(m) => Ok(m),
            Reduction::Values(_) => Err(Error::Backend(
                "expected a matrix, got named values".to_string(),
            )),
        }
    }
}

/// Pixel mask predicates. Pixels failing the rule are masked in every band.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskRule {
    /// Keep pixels where `bit` of the integer value of `band` is 0.
    BitClear { band: String, bit: u8 },
    /// Keep pixels where `band < threshold`.
    LessThan { band: String, threshold: f64 },
}

/// Eigen decomposition of a symmetric matrix; `vectors` holds one
/// eigenvector per row, sorted by descending eigenvalue.
#[derive(Debug, Clone, PartialEq)]
pub struct Eigen {
    pub values: Vec<f64>,
    pub vectors: Array2<f64>,
}

/// Pixel samples: one row per pixel, one column per band.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub bands: Vec<String>,
    pub rows: Array2<f64>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClustererSpec {
    pub algorithm: ClusterAlgorithm,
    pub min_clusters: usize,
    pub max_clusters: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    pub scale: f64,
    pub crs: String,
    pub max_pixels: f64,
    pub region: Option<Geometry>,
    /// Recorded in the export's metadata sidecar.
    pub visualization: Option<VisualizationParams>,
}

/// Handle of a submitted export. Submission never waits for completion;
/// callers may poll or block on the handle if they care.
#[derive(Debug)]
pub struct ExportTask {
    pub id: String,
    pub description: String,
    done: mpsc::Receiver<Result<Vec<PathBuf>>>,
}

impl ExportTask {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        done: mpsc::Receiver<Result<Vec<PathBuf>>>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            done,
        }
    }

    /// `None` while the export is still running.
    pub fn poll(&self) -> Option<Result<Vec<PathBuf>>> {
        match self.done.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(Error::Backend(
                "export worker exited without reporting".to_string(),
            ))),
        }
    }

    pub fn wait(self) -> Result<Vec<PathBuf>> {
        self.done
            .recv()
            .map_err(|_| Error::Backend("export worker exited without reporting".to_string()))?
    }
}

/// Property holding an image's acquisition time in epoch milliseconds.
pub const TIME_START: &str = "system:time_start";
/// Property identifying a scene within its collection; join key.
pub const SCENE_INDEX: &str = "system:index";

/// A raster image on the backend. Operations return new images; nothing is
/// modified in place.
pub trait RasterImage: Clone + Send + 'static {
    fn band_names(&self) -> Vec<String>;

    fn band_set(&self) -> BandSet {
        BandSet::from(self.band_names())
    }

    fn property(&self, name: &str) -> Option<Value>;
    fn with_property(&self, name: &str, value: Value) -> Self;

    fn property_str(&self, name: &str) -> Option<String> {
        self.property(name)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn property_f64(&self, name: &str) -> Option<f64> {
        self.property(name).and_then(|v| v.as_f64())
    }

    fn acquisition_date(&self) -> Option<NaiveDate> {
        let millis = self.property(TIME_START)?.as_i64()?;
        DateTime::from_timestamp_millis(millis).map(|t| t.date_naive())
    }

    fn select(&self, bands: &[&str]) -> Result<Self>;
    fn rename(&self, names: &[&str]) -> Result<Self>;
    fn add_bands(&self, other: &Self, overwrite: bool) -> Result<Self>;

    /// `(a - b) / (a + b)` as a single band named `nd`.
    fn normalized_difference(&self, a: &str, b: &str) -> Result<Self>;
    /// Band-math expression over band names, as a single band.
    fn expression(&self, expr: &str) -> Result<Self>;
    /// `value * gain + offset` on every band.
    fn affine(&self, gain: f64, offset: f64) -> Self;
    fn subtract_per_band(&self, values: &BTreeMap<String, f64>) -> Result<Self>;
    fn divide_per_band(&self, values: &BTreeMap<String, f64>) -> Result<Self>;

    fn update_mask(&self, rule: &MaskRule) -> Result<Self>;
    fn clip(&self, region: &Geometry) -> Self;
    fn footprint(&self) -> Option<Geometry>;

    fn reduce_region(
        &self,
        reducer: &Reducer,
        region: &Geometry,
        scale: f64,
        best_effort: bool,
    ) -> Result<Reduction>;

    /// Linear combination of bands: output band `i` is `Σ_j matrix[i][j] * band_j`.
    fn project(&self, matrix: &Array2<f64>, names: &[String]) -> Result<Self>;

    /// Three bands in, `hue`/`saturation`/`value` out.
    fn rgb_to_hsv(&self) -> Result<Self>;
    /// `hue`/`saturation`/`value` in, `red`/`green`/`blue` out.
    fn hsv_to_rgb(&self) -> Result<Self>;

    fn sample(&self, region: &Geometry, scale: f64, num_pixels: usize, seed: u64)
    -> Result<SampleSet>;

    /// Per-class display colours for an integer class band.
    fn random_visualizer(&self) -> Result<Self>;
}

pub trait ImageCollection: Clone + Send + 'static {
    type Image: RasterImage;

    fn filter_bounds(&self, region: &Geometry) -> Self;
    fn filter_date(&self, range: &DateRange) -> Self;
    /// Keep images whose numeric property is below `value`.
    fn filter_lt(&self, property: &str, value: f64) -> Self;
    fn sort(&self, property: &str, ascending: bool) -> Self;
    fn limit(&self, n: usize) -> Self;

    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn first(&self) -> Option<Self::Image>;
    fn images(&self) -> Vec<Self::Image>;

    fn map<F>(&self, f: F) -> Result<Self>
    where
        F: FnMut(Self::Image) -> Result<Self::Image>;

    /// Inner join on a shared property: each image gets the bands of the first
    /// `other` image with an equal `key`. Images without a match are dropped.
    fn join_bands(&self, other: &Self, key: &str) -> Result<Self>;

    /// Per-pixel median over unmasked values; `None` when empty.
    fn median(&self) -> Result<Option<Self::Image>>;
}

pub trait Backend {
    type Image: RasterImage;
    type Collection: ImageCollection<Image = Self::Image>;
    type Clusterer;
    type Classifier;

    fn collection(&self, id: &str) -> Result<Self::Collection>;

    fn eigen(&self, symmetric: &Array2<f64>) -> Result<Eigen>;

    fn train_clusterer(&self, spec: &ClustererSpec, samples: &SampleSet)
    -> Result<Self::Clusterer>;
    /// Assign every pixel a cluster id in a band named `cluster`.
    fn cluster(&self, clusterer: &Self::Clusterer, image: &Self::Image) -> Result<Self::Image>;

    /// Load an externally trained model; `ModelNotFound` if the asset id does
    /// not resolve.
    fn load_classifier(&self, asset_id: &str) -> Result<Self::Classifier>;
    /// Class ids in a band named `classification`.
    fn classify(&self, classifier: &Self::Classifier, image: &Self::Image)
    -> Result<Self::Image>;

    fn export(&self, image: &Self::Image, request: &ExportRequest) -> Result<ExportTask>;
}
