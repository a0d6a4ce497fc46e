//! Display stretch: one shared `{min, max}` across a band triple, computed from
//! per-band 2nd/98th percentiles.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Percentile statistics of one band over a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPercentiles {
    pub p2: f64,
    pub p98: f64,
}

impl BandPercentiles {
    /// Stand-in for a band with no statistics (empty or fully masked region).
    pub const MISSING: BandPercentiles = BandPercentiles { p2: 0.0, p98: 1.0 };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationRange {
    pub min: f64,
    pub max: f64,
    pub bands: [String; 3],
}

impl VisualizationRange {
    /// A zero-width range renders flat; callers must not divide by `max - min`.
    pub fn is_flat(&self) -> bool {
        self.min == self.max
    }
}

/// Rendering parameters handed to the display/export layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisualizationParams {
    pub bands: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette: Option<Vec<String>>,
}

impl VisualizationParams {
    pub fn ranged(bands: Vec<String>, min: f64, max: f64) -> Self {
        Self {
            bands,
            min: Some(min),
            max: Some(max),
            palette: None,
        }
    }

    pub fn with_palette(mut self, palette: Option<Vec<String>>) -> Self {
        self.palette = palette;
        self
    }
}

impl From<VisualizationRange> for VisualizationParams {
    fn from(range: VisualizationRange) -> Self {
        VisualizationParams::ranged(range.bands.to_vec(), range.min, range.max)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StretchCalculator;

impl StretchCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Minimum of the three `p2` values and maximum of the three `p98`
    /// values. Bands without statistics count as `{p2: 0, p98: 1}`.
    pub fn compute(
        &self,
        stats: &BTreeMap<String, BandPercentiles>,
        bands: &[String; 3],
    ) -> VisualizationRange {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for band in bands {
            let p = stats.get(band).copied().unwrap_or_else(|| {
                debug!("No percentiles for {}; using 0/1", band);
                BandPercentiles::MISSING
            });
            min = min.min(p.p2);
            max = max.max(p.p98);
        }

        let range = VisualizationRange {
            min,
            max,
            bands: bands.clone(),
        };
        if range.is_flat() {
            warn!("Flat stretch for {:?}: min == max == {}", bands, min);
        }
        debug!("Stretch {:?}: min={} max={}", bands, range.min, range.max);
        range
    }

    /// Single-band stretch for index products, with an explicit fallback when
    /// the band has no percentiles at all.
    pub fn compute_single(
        &self,
        stats: &BTreeMap<String, BandPercentiles>,
        band: &str,
        fallback: (f64, f64),
    ) -> (f64, f64) {
        match stats.get(band) {
            Some(p) => (p.p2, p.p98),
            None => {
                debug!("No percentiles for {}; using {:?}", band, fallback);
                fallback
            }
        }
    }
}

/// Group reducer output keyed `{band}_p2` / `{band}_p98` into per-band
/// percentiles. A missing or non-finite key defaults on its own (`p2` to 0,
/// `p98` to 1); a band with neither key is left out.
pub fn percentiles_from_reduction(values: &BTreeMap<String, f64>) -> BTreeMap<String, BandPercentiles> {
    let finite = |key: String| values.get(&key).copied().filter(|v| v.is_finite());
    let mut out = BTreeMap::new();
    for key in values.keys() {
        let Some(band) = key
            .strip_suffix("_p2")
            .or_else(|| key.strip_suffix("_p98"))
        else {
            continue;
        };
        if out.contains_key(band) {
            continue;
        }
        let p2 = finite(format!("{band}_p2"));
        let p98 = finite(format!("{band}_p98"));
        if p2.is_none() && p98.is_none() {
            continue;
        }
        if p2.is_none() || p98.is_none() {
            debug!("Partial percentiles for {}; defaulting the missing key", band);
        }
        out.insert(
            band.to_string(),
            BandPercentiles {
                p2: p2.unwrap_or(BandPercentiles::MISSING.p2),
                p98: p98.unwrap_or(BandPercentiles::MISSING.p98),
            },
        );
    }
    out
}
