//! In-process raster backend on `ndarray`.
//!
//! Images are dense `(band, row, col)` cubes on a north-up grid with square
//! pixels and one validity mask shared by all bands. Regional reductions and
//! sampling visit pixel centres inside the region at a stride of
//! `scale / pixel_size`. Clusterers are seeded k-means variants and
//! classifiers are nearest-centroid models registered by asset id.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::{
    Backend, Bounds, ClustererSpec, DateRange, Eigen, ExportRequest, ExportTask, Geometry,
    ImageCollection, MaskRule, RasterImage, Reducer, Reduction, SampleSet,
};
use crate::error::{Error, Result};
use crate::io::writers;
use crate::types::ClusterAlgorithm;

/// North-up grid placement: top-left corner and square pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
}

impl GridTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_size,
        }
    }

    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_size,
            self.origin_y - (row as f64 + 0.5) * self.pixel_size,
        )
    }

    pub fn bounds(&self, rows: usize, cols: usize) -> Bounds {
        Bounds::new(
            self.origin_x,
            self.origin_y - rows as f64 * self.pixel_size,
            self.origin_x + cols as f64 * self.pixel_size,
            self.origin_y,
        )
    }

    /// GDAL-style six-coefficient geotransform.
    pub fn geotransform(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_size,
            0.0,
            self.origin_y,
            0.0,
            -self.pixel_size,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct MemoryImage {
    bands: Vec<String>,
    data: Array3<f64>,
    mask: Array2<bool>,
    transform: GridTransform,
    properties: BTreeMap<String, Value>,
}

impl MemoryImage {
    pub fn from_bands(transform: GridTransform, bands: Vec<(String, Array2<f64>)>) -> Result<Self> {
        let Some((_, first)) = bands.first() else {
            return Err(Error::InvalidArgument {
                arg: "bands",
                value: "no bands".to_string(),
            });
        };
        let shape = first.dim();
        let mut names = Vec::with_capacity(bands.len());
        let mut planes = Vec::with_capacity(bands.len());
        for (name, plane) in bands {
            if plane.dim() != shape {
                return Err(Error::InvalidArgument {
                    arg: "bands",
                    value: format!("band {} is {:?}, expected {:?}", name, plane.dim(), shape),
                });
            }
            if names.contains(&name) {
                return Err(Error::InvalidArgument {
                    arg: "bands",
                    value: format!("duplicate band {name}"),
                });
            }
            names.push(name);
            planes.push(plane);
        }
        Ok(Self {
            bands: names,
            data: stack_planes(&planes)?,
            mask: Array2::from_elem(shape, true),
            transform,
            properties: BTreeMap::new(),
        })
    }

    /// Uniform image; handy for tests and synthetic scenes.
    pub fn constant(
        transform: GridTransform,
        rows: usize,
        cols: usize,
        bands: &[(&str, f64)],
    ) -> Result<Self> {
        Self::from_bands(
            transform,
            bands
                .iter()
                .map(|&(name, value)| (name.to_string(), Array2::from_elem((rows, cols), value)))
                .collect(),
        )
    }

    /// Replace the validity mask (`true` = valid).
    pub fn with_mask(mut self, mask: Array2<bool>) -> Result<Self> {
        if mask.dim() != self.shape() {
            return Err(Error::InvalidArgument {
                arg: "mask",
                value: format!("{:?}, expected {:?}", mask.dim(), self.shape()),
            });
        }
        self.mask = mask;
        Ok(self)
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, Value>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn transform(&self) -> GridTransform {
        self.transform
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub fn band(&self, name: &str) -> Result<ArrayView2<'_, f64>> {
        Ok(self.data.index_axis(Axis(0), self.band_index(name)?))
    }

    /// Pixel value, `None` where masked.
    pub fn value(&self, band: &str, row: usize, col: usize) -> Option<f64> {
        let b = self.band_index(band).ok()?;
        let valid = *self.mask.get((row, col))?;
        valid.then(|| self.data[[b, row, col]])
    }

    pub fn valid_pixel_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Band planes as `f32` rows, masked pixels as NaN.
    pub fn export_planes(&self) -> Vec<Vec<f32>> {
        self.data
            .outer_iter()
            .map(|plane| {
                plane
                    .iter()
                    .zip(self.mask.iter())
                    .map(|(&v, &m)| if m { v as f32 } else { f32::NAN })
                    .collect()
            })
            .collect()
    }

    fn band_index(&self, name: &str) -> Result<usize> {
        self.bands
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| Error::BandNotFound {
                band: name.to_string(),
                available: self.bands.join(", "),
            })
    }

    fn plane(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// New image on the same grid with the same mask and properties.
    fn rebuild(&self, names: Vec<String>, planes: Vec<Array2<f64>>) -> Result<Self> {
        Ok(Self {
            bands: names,
            data: stack_planes(&planes)?,
            mask: self.mask.clone(),
            transform: self.transform,
            properties: self.properties.clone(),
        })
    }

    fn same_grid(&self, other: &MemoryImage) -> bool {
        self.shape() == other.shape() && self.transform == other.transform
    }

    fn region_pixels(&self, region: &Geometry, scale: f64) -> Vec<(usize, usize)> {
        let step = if scale.is_finite() && scale > 0.0 {
            (scale / self.transform.pixel_size).round().max(1.0) as usize
        } else {
            1
        };
        let (rows, cols) = self.shape();
        let mut pixels = Vec::new();
        for r in (0..rows).step_by(step) {
            for c in (0..cols).step_by(step) {
                if !self.mask[[r, c]] {
                    continue;
                }
                let (x, y) = self.transform.pixel_center(r, c);
                if region.contains(x, y) {
                    pixels.push((r, c));
                }
            }
        }
        pixels
    }

    fn operand(&self, token: &str) -> Result<Array2<f64>> {
        if let Ok(index) = self.band_index(token) {
            return Ok(self.plane(index).to_owned());
        }
        token
            .parse::<f64>()
            .map(|v| Array2::from_elem(self.shape(), v))
            .map_err(|_| Error::BandNotFound {
                band: token.to_string(),
                available: self.bands.join(", "),
            })
    }

    fn map_triple<F>(&self, names: [&str; 3], f: F) -> Result<Self>
    where
        F: Fn(f64, f64, f64) -> (f64, f64, f64),
    {
        if self.bands.len() != 3 {
            return Err(Error::Backend(format!(
                "expected 3 bands, got {}",
                self.bands.len()
            )));
        }
        let shape = self.shape();
        let mut out = [
            Array2::zeros(shape),
            Array2::zeros(shape),
            Array2::zeros(shape),
        ];
        for ((r, c), _) in self.mask.indexed_iter() {
            let (x, y, z) = f(
                self.data[[0, r, c]],
                self.data[[1, r, c]],
                self.data[[2, r, c]],
            );
            out[0][[r, c]] = x;
            out[1][[r, c]] = y;
            out[2][[r, c]] = z;
        }
        self.rebuild(names.map(str::to_string).to_vec(), out.to_vec())
    }

    fn per_band<F>(&self, values: &BTreeMap<String, f64>, f: F) -> Result<Self>
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut planes = Vec::with_capacity(self.bands.len());
        for (i, band) in self.bands.iter().enumerate() {
            let value = *values.get(band).ok_or_else(|| {
                Error::Backend(format!("no per-band value supplied for {band}"))
            })?;
            planes.push(self.plane(i).mapv(|v| f(v, value)));
        }
        self.rebuild(self.bands.clone(), planes)
    }
}

fn stack_planes(planes: &[Array2<f64>]) -> Result<Array3<f64>> {
    let views: Vec<ArrayView2<f64>> = planes.iter().map(|p| p.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(Error::backend)
}

impl RasterImage for MemoryImage {
    fn band_names(&self) -> Vec<String> {
        self.bands.clone()
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn with_property(&self, name: &str, value: Value) -> Self {
        let mut image = self.clone();
        image.properties.insert(name.to_string(), value);
        image
    }

    fn select(&self, bands: &[&str]) -> Result<Self> {
        let mut planes = Vec::with_capacity(bands.len());
        for band in bands {
            planes.push(self.plane(self.band_index(band)?).to_owned());
        }
        self.rebuild(bands.iter().map(|b| b.to_string()).collect(), planes)
    }

    fn rename(&self, names: &[&str]) -> Result<Self> {
        if names.len() != self.bands.len() {
            return Err(Error::Backend(format!(
                "cannot rename {} bands to {} names",
                self.bands.len(),
                names.len()
            )));
        }
        let mut image = self.clone();
        image.bands = names.iter().map(|n| n.to_string()).collect();
        Ok(image)
    }

    fn add_bands(&self, other: &Self, overwrite: bool) -> Result<Self> {
        if !self.same_grid(other) {
            return Err(Error::Backend(
                "cannot add bands from an image on a different grid".to_string(),
            ));
        }
        let mut names = self.bands.clone();
        let mut planes: Vec<Array2<f64>> =
            (0..self.bands.len()).map(|i| self.plane(i).to_owned()).collect();
        for (j, band) in other.bands.iter().enumerate() {
            match names.iter().position(|n| n == band) {
                Some(i) if overwrite => planes[i] = other.plane(j).to_owned(),
                Some(_) => {
                    return Err(Error::Backend(format!(
                        "band {band} already exists; pass overwrite to replace it"
                    )));
                }
                None => {
                    names.push(band.clone());
                    planes.push(other.plane(j).to_owned());
                }
            }
        }
        let mut image = self.rebuild(names, planes)?;
        image.mask = &self.mask & &other.mask;
        Ok(image)
    }

    fn normalized_difference(&self, a: &str, b: &str) -> Result<Self> {
        let a = self.band(a)?;
        let b = self.band(b)?;
        let mut nd = Array2::zeros(self.shape());
        ndarray::Zip::from(&mut nd)
            .and(&a)
            .and(&b)
            .for_each(|out, &a, &b| {
                let sum = a + b;
                *out = if sum == 0.0 { 0.0 } else { (a - b) / sum };
            });
        self.rebuild(vec!["nd".to_string()], vec![nd])
    }

    /// Supports `<operand> <op> <operand>` with `+ - * /`, where operands are
    /// band names or numbers. Division by zero masks the pixel.
    fn expression(&self, expr: &str) -> Result<Self> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        let [lhs, op, rhs] = tokens.as_slice() else {
            return Err(Error::InvalidArgument {
                arg: "expression",
                value: expr.to_string(),
            });
        };
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let mut mask = self.mask.clone();
        let out = match *op {
            "+" => &lhs + &rhs,
            "-" => &lhs - &rhs,
            "*" => &lhs * &rhs,
            "/" => {
                ndarray::Zip::from(&mut mask).and(&rhs).for_each(|m, &d| {
                    if d == 0.0 {
                        *m = false;
                    }
                });
                ndarray::Zip::from(&lhs)
                    .and(&rhs)
                    .map_collect(|&n, &d| if d == 0.0 { 0.0 } else { n / d })
            }
            other => {
                return Err(Error::InvalidArgument {
                    arg: "expression operator",
                    value: other.to_string(),
                });
            }
        };
        let mut image = self.rebuild(vec!["expression".to_string()], vec![out])?;
        image.mask = mask;
        Ok(image)
    }

    fn affine(&self, gain: f64, offset: f64) -> Self {
        let mut image = self.clone();
        image.data.mapv_inplace(|v| v * gain + offset);
        image
    }

    fn subtract_per_band(&self, values: &BTreeMap<String, f64>) -> Result<Self> {
        self.per_band(values, |v, m| v - m)
    }

    /// Division by zero yields 0.
    fn divide_per_band(&self, values: &BTreeMap<String, f64>) -> Result<Self> {
        self.per_band(values, |v, d| if d == 0.0 { 0.0 } else { v / d })
    }

    fn update_mask(&self, rule: &MaskRule) -> Result<Self> {
        let mut image = self.clone();
        match rule {
            MaskRule::BitClear { band, bit } => {
                let plane = self.band(band)?;
                let bit = u32::from(*bit);
                ndarray::Zip::from(&mut image.mask)
                    .and(&plane)
                    .for_each(|m, &v| *m = *m && (v as i64).checked_shr(bit).unwrap_or(0) & 1 == 0);
            }
            MaskRule::LessThan { band, threshold } => {
                let plane = self.band(band)?;
                ndarray::Zip::from(&mut image.mask)
                    .and(&plane)
                    .for_each(|m, &v| *m = *m && v < *threshold);
            }
        }
        trace!("Mask {:?}: {} valid pixels", rule, image.valid_pixel_count());
        Ok(image)
    }

    fn clip(&self, region: &Geometry) -> Self {
        let mut image = self.clone();
        let transform = self.transform;
        for ((r, c), m) in image.mask.indexed_iter_mut() {
            if *m {
                let (x, y) = transform.pixel_center(r, c);
                *m = region.contains(x, y);
            }
        }
        image
    }

    fn footprint(&self) -> Option<Geometry> {
        let (rows, cols) = self.shape();
        Some(Geometry::rectangle(self.transform.bounds(rows, cols)))
    }

    fn reduce_region(
        &self,
        reducer: &Reducer,
        region: &Geometry,
        scale: f64,
        best_effort: bool,
    ) -> Result<Reduction> {
        let pixels = self.region_pixels(region, scale);
        debug!(
            "reduce_region {:?} over {} pixels at {} m (best_effort={})",
            reducer,
            pixels.len(),
            scale,
            best_effort
        );
        let column = |b: usize| -> Vec<f64> {
            pixels.iter().map(|&(r, c)| self.data[[b, r, c]]).collect()
        };

        match reducer {
            Reducer::Mean => {
                let mut out = BTreeMap::new();
                if !pixels.is_empty() {
                    for (b, band) in self.bands.iter().enumerate() {
                        let values = column(b);
                        out.insert(band.clone(), values.iter().sum::<f64>() / values.len() as f64);
                    }
                }
                Ok(Reduction::Values(out))
            }
            Reducer::MinMax => {
                let mut out = BTreeMap::new();
                if !pixels.is_empty() {
                    for (b, band) in self.bands.iter().enumerate() {
                        let values = column(b);
                        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        out.insert(format!("{band}_min"), min);
                        out.insert(format!("{band}_max"), max);
                    }
                }
                Ok(Reduction::Values(out))
            }
            Reducer::Percentile(percentiles) => {
                let mut out = BTreeMap::new();
                if !pixels.is_empty() {
                    for (b, band) in self.bands.iter().enumerate() {
                        let mut values = column(b);
                        values.sort_by(f64::total_cmp);
                        for &p in percentiles {
                            let rank = (f64::from(p.min(100)) / 100.0 * (values.len() - 1) as f64)
                                .round() as usize;
                            out.insert(format!("{band}_p{p}"), values[rank]);
                        }
                    }
                }
                Ok(Reduction::Values(out))
            }
            Reducer::CenteredCovariance => {
                let n = pixels.len();
                if n < 2 {
                    return Err(Error::EmptyResult(format!(
                        "covariance needs at least 2 pixels, region has {n}"
                    )));
                }
                let columns: Vec<Vec<f64>> = (0..self.bands.len()).map(column).collect();
                let means: Vec<f64> = columns
                    .iter()
                    .map(|c| c.iter().sum::<f64>() / n as f64)
                    .collect();
                let k = columns.len();
                let mut cov = Array2::zeros((k, k));
                for i in 0..k {
                    for j in i..k {
                        let s: f64 = columns[i]
                            .iter()
                            .zip(&columns[j])
                            .map(|(a, b)| (a - means[i]) * (b - means[j]))
                            .sum();
                        let v = s / (n - 1) as f64;
                        cov[[i, j]] = v;
                        cov[[j, i]] = v;
                    }
                }
                Ok(Reduction::Matrix(cov))
            }
        }
    }

    fn project(&self, matrix: &Array2<f64>, names: &[String]) -> Result<Self> {
        if matrix.ncols() != self.bands.len() || matrix.nrows() != names.len() {
            return Err(Error::Backend(format!(
                "projection matrix {:?} does not fit {} bands into {} outputs",
                matrix.dim(),
                self.bands.len(),
                names.len()
            )));
        }
        let mut planes = Vec::with_capacity(names.len());
        for row in matrix.outer_iter() {
            let mut acc = Array2::zeros(self.shape());
            for (j, &w) in row.iter().enumerate() {
                acc.scaled_add(w, &self.plane(j));
            }
            planes.push(acc);
        }
        self.rebuild(names.to_vec(), planes)
    }

    fn rgb_to_hsv(&self) -> Result<Self> {
        self.map_triple(["hue", "saturation", "value"], rgb_to_hsv)
    }

    fn hsv_to_rgb(&self) -> Result<Self> {
        self.map_triple(["red", "green", "blue"], hsv_to_rgb)
    }

    fn sample(
        &self,
        region: &Geometry,
        scale: f64,
        num_pixels: usize,
        seed: u64,
    ) -> Result<SampleSet> {
        let mut pixels = self.region_pixels(region, scale);
        if pixels.len() > num_pixels {
            let mut rng = StdRng::seed_from_u64(seed);
            pixels = pixels.partial_shuffle(&mut rng, num_pixels).0.to_vec();
        }
        let rows = Array2::from_shape_fn((pixels.len(), self.bands.len()), |(i, b)| {
            let (r, c) = pixels[i];
            self.data[[b, r, c]]
        });
        debug!("Sampled {} pixels at {} m", rows.nrows(), scale);
        Ok(SampleSet {
            bands: self.bands.clone(),
            rows,
        })
    }

    fn random_visualizer(&self) -> Result<Self> {
        if self.bands.len() != 1 {
            return Err(Error::Backend(format!(
                "random visualizer needs one class band, got {}",
                self.bands.len()
            )));
        }
        let classes = self.plane(0);
        let shape = self.shape();
        let mut rgb = [
            Array2::zeros(shape),
            Array2::zeros(shape),
            Array2::zeros(shape),
        ];
        for ((r, c), &class) in classes.indexed_iter() {
            let color = class_color(class.round() as i64);
            for (k, plane) in rgb.iter_mut().enumerate() {
                plane[[r, c]] = f64::from(color[k]);
            }
        }
        self.rebuild(
            vec![
                "vis-red".to_string(),
                "vis-green".to_string(),
                "vis-blue".to_string(),
            ],
            rgb.to_vec(),
        )
    }
}

fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max != 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    (h / 6.0, s, max)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let c = v * s;
    let x = c * (1.0 - (h6 % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h6 as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r + m, g + m, b + m)
}

/// Stable pseudo-random colour per class id.
fn class_color(class: i64) -> [u8; 3] {
    StdRng::seed_from_u64(class as u64 ^ 0x5EED_C010_u64).r#gen()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    id: String,
    images: Vec<MemoryImage>,
}

impl MemoryCollection {
    pub fn new(id: impl Into<String>, images: Vec<MemoryImage>) -> Self {
        Self {
            id: id.into(),
            images,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn retain<F: Fn(&MemoryImage) -> bool>(&self, keep: F) -> Self {
        Self {
            id: self.id.clone(),
            images: self.images.iter().filter(|i| keep(i)).cloned().collect(),
        }
    }
}

impl ImageCollection for MemoryCollection {
    type Image = MemoryImage;

    fn filter_bounds(&self, region: &Geometry) -> Self {
        let target = region.bounds();
        self.retain(|image| {
            image
                .footprint()
                .is_some_and(|f| f.bounds().intersects(&target))
        })
    }

    fn filter_date(&self, range: &DateRange) -> Self {
        self.retain(|image| image.acquisition_date().is_some_and(|d| range.contains(d)))
    }

    fn filter_lt(&self, property: &str, value: f64) -> Self {
        self.retain(|image| image.property_f64(property).is_some_and(|v| v < value))
    }

    fn sort(&self, property: &str, ascending: bool) -> Self {
        let mut images = self.images.clone();
        // Images without the property go last either way.
        images.sort_by(|a, b| {
            match (a.property_f64(property), b.property_f64(property)) {
                (Some(x), Some(y)) if ascending => x.total_cmp(&y),
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        Self {
            id: self.id.clone(),
            images,
        }
    }

    fn limit(&self, n: usize) -> Self {
        Self {
            id: self.id.clone(),
            images: self.images.iter().take(n).cloned().collect(),
        }
    }

    fn len(&self) -> usize {
        self.images.len()
    }

    fn first(&self) -> Option<MemoryImage> {
        self.images.first().cloned()
    }

    fn images(&self) -> Vec<MemoryImage> {
        self.images.clone()
    }

    fn map<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(MemoryImage) -> Result<MemoryImage>,
    {
        let images = self
            .images
            .iter()
            .cloned()
            .map(&mut f)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: self.id.clone(),
            images,
        })
    }

    fn join_bands(&self, other: &Self, key: &str) -> Result<Self> {
        let mut images = Vec::with_capacity(self.images.len());
        for image in &self.images {
            let partner = image
                .property(key)
                .and_then(|k| other.images.iter().find(|o| o.property(key) == Some(k.clone())));
            if let Some(p) = partner {
                images.push(image.add_bands(p, false)?);
            }
        }
        debug!(
            "Joined {} of {} images on {}",
            images.len(),
            self.images.len(),
            key
        );
        Ok(Self {
            id: self.id.clone(),
            images,
        })
    }

    fn median(&self) -> Result<Option<MemoryImage>> {
        let Some(first) = self.images.first() else {
            return Ok(None);
        };
        if let Some(odd) = self.images.iter().find(|i| !i.same_grid(first)) {
            return Err(Error::Backend(format!(
                "median needs images on one grid: {:?} vs {:?}",
                first.shape(),
                odd.shape()
            )));
        }
        let indices: Vec<Vec<usize>> = self
            .images
            .iter()
            .map(|image| {
                first
                    .bands
                    .iter()
                    .map(|b| image.band_index(b))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<_>>()?;

        let (rows, cols) = first.shape();
        let mut data = Array3::zeros((first.bands.len(), rows, cols));
        let mut mask = Array2::from_elem((rows, cols), false);
        let mut values = Vec::with_capacity(self.images.len());
        for b in 0..first.bands.len() {
            for r in 0..rows {
                for c in 0..cols {
                    values.clear();
                    for (image, idx) in self.images.iter().zip(&indices) {
                        if image.mask[[r, c]] {
                            values.push(image.data[[idx[b], r, c]]);
                        }
                    }
                    if values.is_empty() {
                        continue;
                    }
                    values.sort_by(f64::total_cmp);
                    let mid = values.len() / 2;
                    data[[b, r, c]] = if values.len() % 2 == 0 {
                        (values[mid - 1] + values[mid]) / 2.0
                    } else {
                        values[mid]
                    };
                    mask[[r, c]] = true;
                }
            }
        }
        debug!("Median of {} images", self.images.len());
        Ok(Some(MemoryImage {
            bands: first.bands.clone(),
            data,
            mask,
            transform: first.transform,
            properties: BTreeMap::new(),
        }))
    }
}

/// Trained k-means centroids; one row per cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansModel {
    pub bands: Vec<String>,
    pub centroids: Array2<f64>,
}

impl KMeansModel {
    pub fn k(&self) -> usize {
        self.centroids.nrows()
    }
}

/// Nearest-centroid land-cover model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidClassifier {
    pub features: Vec<String>,
    pub classes: Vec<ClassCentroid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCentroid {
    pub class: u32,
    pub centroid: Vec<f64>,
}

impl CentroidClassifier {
    fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(Error::InvalidArgument {
                arg: "classifier",
                value: "no classes".to_string(),
            });
        }
        if let Some(bad) = self
            .classes
            .iter()
            .find(|c| c.centroid.len() != self.features.len())
        {
            return Err(Error::InvalidArgument {
                arg: "classifier",
                value: format!(
                    "class {} has {} values for {} features",
                    bad.class,
                    bad.centroid.len(),
                    self.features.len()
                ),
            });
        }
        Ok(())
    }
}

fn nearest<'a, I>(point: &[f64], centroids: I) -> usize
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut best = (0, f64::INFINITY);
    for (i, centroid) in centroids.into_iter().enumerate() {
        let d: f64 = point
            .iter()
            .zip(centroid)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        if d < best.1 {
            best = (i, d);
        }
    }
    best.0
}

static EXPORT_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    collections: BTreeMap<String, MemoryCollection>,
    models: BTreeMap<String, CentroidClassifier>,
    export_root: PathBuf,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory export folders are created under.
    pub fn with_export_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.export_root = root.into();
        self
    }

    pub fn insert_collection(&mut self, id: impl Into<String>, images: Vec<MemoryImage>) {
        let id = id.into();
        debug!("Registered collection {} ({} images)", id, images.len());
        self.collections
            .insert(id.clone(), MemoryCollection::new(id, images));
    }

    pub fn register_model(
        &mut self,
        asset_id: impl Into<String>,
        model: CentroidClassifier,
    ) -> Result<()> {
        model.validate()?;
        self.models.insert(asset_id.into(), model);
        Ok(())
    }

    pub fn collection_ids(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

impl Backend for MemoryBackend {
    type Image = MemoryImage;
    type Collection = MemoryCollection;
    type Clusterer = KMeansModel;
    type Classifier = CentroidClassifier;

    fn collection(&self, id: &str) -> Result<MemoryCollection> {
        self.collections
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Backend(format!("Image collection not found: {id}")))
    }

    fn eigen(&self, symmetric: &Array2<f64>) -> Result<Eigen> {
        jacobi_eigen(symmetric)
    }

    fn train_clusterer(&self, spec: &ClustererSpec, samples: &SampleSet) -> Result<KMeansModel> {
        if samples.is_empty() {
            return Err(Error::EmptyResult("no pixels sampled for clustering".to_string()));
        }
        let n = samples.len();
        let min_k = spec.min_clusters.clamp(1, n);
        let max_k = spec.max_clusters.clamp(min_k, n);

        let (centroids, chosen) = match spec.algorithm {
            ClusterAlgorithm::KMeans => (kmeans(&samples.rows, min_k, spec.seed).centroids, min_k),
            ClusterAlgorithm::CascadeKMeans | ClusterAlgorithm::XMeans => {
                let mut best: Option<(f64, KMeansFit)> = None;
                for k in min_k..=max_k {
                    let fit = kmeans(&samples.rows, k, spec.seed);
                    let score = match spec.algorithm {
                        ClusterAlgorithm::CascadeKMeans => calinski_harabasz(&samples.rows, &fit),
                        _ => bic(&samples.rows, &fit),
                    };
                    trace!("k={} score={}", k, score);
                    if best.as_ref().is_none_or(|(s, _)| score > *s) {
                        best = Some((score, fit));
                    }
                }
                let fit = best
                    .map(|(_, fit)| fit)
                    .ok_or_else(|| Error::EmptyResult("no cluster count to try".to_string()))?;
                let k = fit.centroids.nrows();
                (fit.centroids, k)
            }
        };
        info!(
            "Trained {} with {} clusters on {} samples",
            spec.algorithm, chosen, n
        );
        Ok(KMeansModel {
            bands: samples.bands.clone(),
            centroids,
        })
    }

    fn cluster(&self, model: &KMeansModel, image: &MemoryImage) -> Result<MemoryImage> {
        let names: Vec<&str> = model.bands.iter().map(String::as_str).collect();
        let features = image.select(&names)?;
        let labels = assign_pixels(&features, model.centroids.outer_iter().map(|r| r.to_vec()));
        image.rebuild(vec!["cluster".to_string()], vec![labels])
    }

    fn load_classifier(&self, asset_id: &str) -> Result<CentroidClassifier> {
        self.models
            .get(asset_id)
            .cloned()
            .ok_or_else(|| Error::ModelNotFound {
                asset_id: asset_id.to_string(),
            })
    }

    fn classify(&self, model: &CentroidClassifier, image: &MemoryImage) -> Result<MemoryImage> {
        let names: Vec<&str> = model.features.iter().map(String::as_str).collect();
        let features = image.select(&names)?;
        let labels = assign_pixels(&features, model.classes.iter().map(|c| c.centroid.clone()))
            .mapv(|i| f64::from(model.classes[i as usize].class));
        image.rebuild(vec!["classification".to_string()], vec![labels])
    }

    fn export(&self, image: &MemoryImage, request: &ExportRequest) -> Result<ExportTask> {
        let image = match &request.region {
            Some(region) => image.clip(region),
            None => image.clone(),
        };
        let (rows, cols) = image.shape();
        if (rows * cols) as f64 > request.max_pixels {
            return Err(Error::InvalidArgument {
                arg: "max_pixels",
                value: format!("{} exceeds {}", rows * cols, request.max_pixels),
            });
        }

        let id = format!("memory-export-{}", EXPORT_COUNTER.fetch_add(1, Ordering::Relaxed));
        let dir = self.export_root.join(&request.folder);
        let description = request.description.clone();
        let request = request.clone();
        info!("Submitting export {} ({}) to {:?}", id, description, dir);

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = write_export(&image, &dir, &request);
            if let Err(e) = &result {
                warn!("Export {} failed: {}", request.description, e);
            }
            let _ = tx.send(result);
        });
        Ok(ExportTask::new(id, description, rx))
    }
}

fn write_export(image: &MemoryImage, dir: &Path, request: &ExportRequest) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let (rows, cols) = image.shape();
    let tif = dir.join(format!("{}.tif", request.file_name_prefix));
    writers::tiff::write_tiff_f32(&tif, cols, rows, &image.export_planes())?;
    let world = writers::worldfile::write_world_file(&tif, image.transform.geotransform())?;
    let prj = writers::worldfile::write_prj_file(&tif, &request.crs)?;
    let sidecar = writers::metadata::write_sidecar(
        &tif,
        &writers::metadata::ExportMetadata {
            description: request.description.clone(),
            bands: image.band_names(),
            width: cols,
            height: rows,
            scale: request.scale,
            crs: request.crs.clone(),
            geotransform: image.transform.geotransform(),
            visualization: request.visualization.clone(),
            properties: image.properties.clone(),
            created: chrono::Utc::now().to_rfc3339(),
        },
    )?;
    info!("Export {} written to {:?}", request.description, tif);
    Ok(vec![tif, world, prj, sidecar])
}

/// Nearest-centroid label per valid pixel; masked pixels keep label 0 and
/// stay masked through `rebuild`.
fn assign_pixels<I>(features: &MemoryImage, centroids: I) -> Array2<f64>
where
    I: Iterator<Item = Vec<f64>>,
{
    let centroids: Vec<Vec<f64>> = centroids.collect();
    let nb = features.bands.len();
    let mut labels = Array2::zeros(features.shape());
    let mut point = vec![0.0; nb];
    for ((r, c), &valid) in features.mask.indexed_iter() {
        if !valid {
            continue;
        }
        for (b, p) in point.iter_mut().enumerate() {
            *p = features.data[[b, r, c]];
        }
        labels[[r, c]] = nearest(&point, centroids.iter().map(Vec::as_slice)) as f64;
    }
    labels
}

struct KMeansFit {
    centroids: Array2<f64>,
    labels: Vec<usize>,
    inertia: f64,
}

const KMEANS_MAX_ITER: usize = 100;

/// Lloyd's algorithm with k-means++ seeding.
fn kmeans(rows: &Array2<f64>, k: usize, seed: u64) -> KMeansFit {
    let (n, d) = rows.dim();
    let mut rng = StdRng::seed_from_u64(seed);
    let dist2 = |i: usize, centroid: &[f64]| -> f64 {
        rows.row(i)
            .iter()
            .zip(centroid)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    };

    let mut centroids: Vec<Vec<f64>> = vec![rows.row(rng.gen_range(0..n)).to_vec()];
    while centroids.len() < k {
        let weights: Vec<f64> = (0..n)
            .map(|i| {
                centroids
                    .iter()
                    .map(|c| dist2(i, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        let next = if total > 0.0 {
            let target = rng.r#gen::<f64>() * total;
            let mut acc = 0.0;
            weights
                .iter()
                .position(|w| {
                    acc += w;
                    acc >= target && *w > 0.0
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centroids.push(rows.row(next).to_vec());
    }

    let mut labels = vec![usize::MAX; n];
    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (i, label) in labels.iter_mut().enumerate() {
            let row = rows.row(i).to_vec();
            let best = nearest(&row, centroids.iter().map(Vec::as_slice));
            if *label != best {
                *label = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        let mut sums = vec![vec![0.0; d]; k];
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            counts[label] += 1;
            for (s, v) in sums[label].iter_mut().zip(rows.row(i)) {
                *s += v;
            }
        }
        for (j, centroid) in centroids.iter_mut().enumerate() {
            if counts[j] > 0 {
                for (c, s) in centroid.iter_mut().zip(&sums[j]) {
                    *c = s / counts[j] as f64;
                }
            }
        }
    }

    let inertia = labels
        .iter()
        .enumerate()
        .map(|(i, &l)| dist2(i, &centroids[l]))
        .sum();
    let flat: Vec<f64> = centroids.into_iter().flatten().collect();
    KMeansFit {
        centroids: Array2::from_shape_vec((k, d), flat).unwrap_or_else(|_| Array2::zeros((k, d))),
        labels,
        inertia,
    }
}

fn total_sum_of_squares(rows: &Array2<f64>) -> f64 {
    let Some(mean) = rows.mean_axis(Axis(0)) else {
        return 0.0;
    };
    rows.outer_iter()
        .map(|r| r.iter().zip(&mean).map(|(a, m)| (a - m) * (a - m)).sum::<f64>())
        .sum()
}

/// Between/within variance ratio. Higher is better.
fn calinski_harabasz(rows: &Array2<f64>, fit: &KMeansFit) -> f64 {
    let n = rows.nrows() as f64;
    let k = fit.centroids.nrows() as f64;
    if k < 2.0 || n <= k {
        return f64::NEG_INFINITY;
    }
    if fit.inertia == 0.0 {
        return f64::INFINITY;
    }
    let between = total_sum_of_squares(rows) - fit.inertia;
    (between / (k - 1.0)) / (fit.inertia / (n - k))
}

/// Bayesian information criterion under identical spherical Gaussians.
/// Higher is better.
fn bic(rows: &Array2<f64>, fit: &KMeansFit) -> f64 {
    let (n, d) = rows.dim();
    let (n, d) = (n as f64, d as f64);
    let k = fit.centroids.nrows() as f64;
    if n <= k {
        return f64::NEG_INFINITY;
    }
    let variance = (fit.inertia / ((n - k) * d)).max(1e-12);
    let mut counts = vec![0usize; fit.centroids.nrows()];
    for &l in &fit.labels {
        counts[l] += 1;
    }
    let log_likelihood: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let c = c as f64;
            c * (c / n).ln()
                - c * d / 2.0 * (2.0 * std::f64::consts::PI * variance).ln()
                - (c - 1.0) * d / 2.0
        })
        .sum();
    let parameters = (k - 1.0) + k * d + 1.0;
    log_likelihood - parameters / 2.0 * n.ln()
}

/// Jacobi eigenvalue iteration for a small symmetric matrix.
pub fn jacobi_eigen(matrix: &Array2<f64>) -> Result<Eigen> {
    let (n, m) = matrix.dim();
    if n != m || n == 0 {
        return Err(Error::Backend(format!(
            "eigen decomposition needs a non-empty square matrix, got {:?}",
            matrix.dim()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::Backend("matrix has non-finite entries".to_string()));
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let max_iter = 100 * n * n;
    let eps = 1e-12;

    for _ in 0..max_iter {
        let mut max_val = 0.0;
        let (mut p, mut q) = (0, 0);
        for i in 0..n {
            for j in (i + 1)..n {
                if a[[i, j]].abs() > max_val {
                    max_val = a[[i, j]].abs();
                    p = i;
                    q = j;
                }
            }
        }
        if max_val < eps {
            break;
        }

        let theta = 0.5 * (2.0 * a[[p, q]]).atan2(a[[p, p]] - a[[q, q]]);
        let (sin_t, cos_t) = theta.sin_cos();

        for i in 0..n {
            let aip = a[[i, p]];
            let aiq = a[[i, q]];
            a[[i, p]] = cos_t * aip + sin_t * aiq;
            a[[i, q]] = -sin_t * aip + cos_t * aiq;
        }
        for j in 0..n {
            let apj = a[[p, j]];
            let aqj = a[[q, j]];
            a[[p, j]] = cos_t * apj + sin_t * aqj;
            a[[q, j]] = -sin_t * apj + cos_t * aqj;
        }
        for i in 0..n {
            let vip = v[[i, p]];
            let viq = v[[i, q]];
            v[[i, p]] = cos_t * vip + sin_t * viq;
            v[[i, q]] = -sin_t * vip + cos_t * viq;
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].total_cmp(&a[[i, i]]));
    let values = order.iter().map(|&i| a[[i, i]]).collect();
    // Columns of `v` are eigenvectors; emit them as rows.
    let vectors = Array2::from_shape_fn((n, n), |(row, col)| v[[col, order[row]]]);
    Ok(Eigen { values, vectors })
}
