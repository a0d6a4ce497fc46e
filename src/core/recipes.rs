//! Recipe registry: the bands, formula, scale, palette and display rule for
//! each (`SensorVariant`, `ProductKind`, selector) combination.
//!
//! All static recipes live in one keyed table built on first use. A missing
//! key is the single failure path (`UnsupportedCombination`); there is no
//! default band layout to fall back to.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    FalseColorComposite, ProcessingLevel, ProductKind, SensorVariant, SpectralIndex,
    SupervisedAlgorithm,
};

/// What a recipe computes, with its input bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Formula {
    /// Display three bands as RGB.
    Composite { bands: [String; 3] },
    /// `(a - b) / (a + b)`
    NormalizedDifference { a: String, b: String },
    /// `numerator / denominator`
    Ratio { numerator: String, denominator: String },
    /// Principal components of these bands.
    Components { bands: Vec<String> },
    /// HSV substitution of the value channel with a panchromatic band.
    Pansharpen { rgb: [String; 3], pan: String },
    /// Cluster every band of the image from a random pixel sample.
    Clustering { sample_size: usize },
    /// Apply an externally trained model to the feature bands.
    Classifier {
        features: Vec<String>,
        model_asset: String,
    },
    /// Kelvin surface temperature; the first candidate present is used.
    SurfaceTemperature { candidates: Vec<String> },
}

/// How the display range of a product is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StretchRule {
    /// Shared 2nd/98th percentile range across the displayed bands.
    Percentile,
    /// Single-band 2nd/98th percentile, with a fallback when statistics are absent.
    PercentileOr { min: f64, max: f64 },
    Fixed { min: f64, max: f64 },
    /// Randomized per-class colours; no numeric range.
    RandomColors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub variant: SensorVariant,
    pub kind: ProductKind,
    pub selector: Option<String>,
    pub formula: Formula,
    /// Processing scale in metres.
    pub scale: f64,
    pub palette: Option<Vec<String>>,
    pub stretch: StretchRule,
}

impl Recipe {
    /// Input bands in the order the formula consumes them. Empty for
    /// clustering, which uses every band of the image.
    pub fn input_bands(&self) -> Vec<&str> {
        match &self.formula {
            Formula::Composite { bands } => bands.iter().map(String::as_str).collect(),
            Formula::NormalizedDifference { a, b } => vec![a, b],
            Formula::Ratio {
                numerator,
                denominator,
            } => vec![numerator, denominator],
            Formula::Components { bands } => bands.iter().map(String::as_str).collect(),
            Formula::Pansharpen { rgb, pan } => {
                let mut v: Vec<&str> = rgb.iter().map(String::as_str).collect();
                v.push(pan);
                v
            }
            Formula::Clustering { .. } => Vec::new(),
            Formula::Classifier { features, .. } => features.iter().map(String::as_str).collect(),
            Formula::SurfaceTemperature { candidates } => {
                candidates.iter().map(String::as_str).collect()
            }
        }
    }

    /// Band-math expression for ratio recipes, e.g. `SR_B5 / SR_B4`.
    pub fn expression(&self) -> Option<String> {
        match &self.formula {
            Formula::Ratio {
                numerator,
                denominator,
            } => Some(format!("{} / {}", numerator, denominator)),
            _ => None,
        }
    }
}

// Static band tables. Rows are per variant; triples are never shared across
// variants even when the composite name matches.

type IndexRow = (SpectralIndex, &'static str, &'static str);

const S2_INDICES: [IndexRow; 6] = [
    (SpectralIndex::Ndvi, "B8", "B4"),
    (SpectralIndex::Ndwi, "B3", "B8"),
    (SpectralIndex::Ndbi, "B11", "B8"),
    (SpectralIndex::Rvi, "B8", "B4"),
    (SpectralIndex::Grvi, "B3", "B4"),
    (SpectralIndex::Gndvi, "B8", "B3"),
];

const L7_SR_INDICES: [IndexRow; 6] = [
    (SpectralIndex::Ndvi, "SR_B4", "SR_B3"),
    (SpectralIndex::Ndwi, "SR_B2", "SR_B4"),
    (SpectralIndex::Ndbi, "SR_B5", "SR_B4"),
    (SpectralIndex::Rvi, "SR_B4", "SR_B3"),
    (SpectralIndex::Grvi, "SR_B2", "SR_B3"),
    (SpectralIndex::Gndvi, "SR_B4", "SR_B2"),
];

const L89_SR_INDICES: [IndexRow; 6] = [
    (SpectralIndex::Ndvi, "SR_B5", "SR_B4"),
    (SpectralIndex::Ndwi, "SR_B3", "SR_B5"),
    (SpectralIndex::Ndbi, "SR_B6", "SR_B5"),
    (SpectralIndex::Rvi, "SR_B5", "SR_B4"),
    (SpectralIndex::Grvi, "SR_B3", "SR_B4"),
    (SpectralIndex::Gndvi, "SR_B5", "SR_B3"),
];

const L7_TOA_INDICES: [IndexRow; 6] = [
    (SpectralIndex::Ndvi, "B4", "B3"),
    (SpectralIndex::Ndwi, "B2", "B4"),
    (SpectralIndex::Ndbi, "B5", "B4"),
    (SpectralIndex::Rvi, "B4", "B3"),
    (SpectralIndex::Grvi, "B2", "B3"),
    (SpectralIndex::Gndvi, "B4", "B2"),
];

const L89_TOA_INDICES: [IndexRow; 6] = [
    (SpectralIndex::Ndvi, "B5", "B4"),
    (SpectralIndex::Ndwi, "B3", "B5"),
    (SpectralIndex::Ndbi, "B6", "B5"),
    (SpectralIndex::Rvi, "B5", "B4"),
    (SpectralIndex::Grvi, "B3", "B4"),
    (SpectralIndex::Gndvi, "B5", "B3"),
];

type TripleRow = (FalseColorComposite, [&'static str; 3]);

const S2_FALSE_COLOR: [TripleRow; 10] = [
    (FalseColorComposite::Agriculture, ["B11", "B8", "B2"]),
    (FalseColorComposite::Geology, ["B12", "B11", "B2"]),
    (FalseColorComposite::Bathymetric, ["B4", "B3", "B1"]),
    (FalseColorComposite::FalseColorInfrared, ["B8", "B4", "B3"]),
    (FalseColorComposite::FalseColorUrban, ["B12", "B11", "B4"]),
    (FalseColorComposite::HealthyVegetation, ["B8", "B11", "B2"]),
    (FalseColorComposite::LandWater, ["B8", "B11", "B4"]),
    (FalseColorComposite::NaturalWithAtmosphericRemoval, ["B12", "B8", "B3"]),
    (FalseColorComposite::ShortwaveInfrared, ["B12", "B8", "B4"]),
    (FalseColorComposite::VegetationAnalysis, ["B11", "B8", "B4"]),
];

const L7_SR_FALSE_COLOR: [TripleRow; 9] = [
    (FalseColorComposite::FalseColorUrban, ["SR_B5", "SR_B4", "SR_B3"]),
    (FalseColorComposite::ColorInfraredVegetation, ["SR_B4", "SR_B3", "SR_B2"]),
    (FalseColorComposite::Agriculture, ["SR_B5", "SR_B4", "SR_B1"]),
    (FalseColorComposite::AtmosphericPenetration, ["SR_B7", "SR_B5", "SR_B3"]),
    (FalseColorComposite::HealthyVegetation, ["SR_B4", "SR_B5", "SR_B2"]),
    (FalseColorComposite::LandWater, ["SR_B4", "SR_B5", "SR_B3"]),
    (FalseColorComposite::NaturalWithAtmosphericRemoval, ["SR_B7", "SR_B4", "SR_B2"]),
    (FalseColorComposite::ShortwaveInfrared, ["SR_B7", "SR_B5", "SR_B4"]),
    (FalseColorComposite::VegetationAnalysis, ["SR_B5", "SR_B4", "SR_B3"]),
];

const L89_SR_FALSE_COLOR: [TripleRow; 9] = [
    (FalseColorComposite::FalseColorUrban, ["SR_B7", "SR_B6", "SR_B4"]),
    (FalseColorComposite::ColorInfraredVegetation, ["SR_B5", "SR_B4", "SR_B3"]),
    (FalseColorComposite::Agriculture, ["SR_B6", "SR_B5", "SR_B2"]),
    (FalseColorComposite::AtmosphericPenetration, ["SR_B7", "SR_B6", "SR_B5"]),
    (FalseColorComposite::HealthyVegetation, ["SR_B5", "SR_B6", "SR_B2"]),
    (FalseColorComposite::LandWater, ["SR_B5", "SR_B6", "SR_B4"]),
    (FalseColorComposite::NaturalWithAtmosphericRemoval, ["SR_B7", "SR_B5", "SR_B3"]),
    (FalseColorComposite::ShortwaveInfrared, ["SR_B7", "SR_B5", "SR_B4"]),
    (FalseColorComposite::VegetationAnalysis, ["SR_B6", "SR_B5", "SR_B4"]),
];

const L7_TOA_FALSE_COLOR: [TripleRow; 9] = [
    (FalseColorComposite::FalseColorUrban, ["B5", "B4", "B3"]),
    (FalseColorComposite::ColorInfraredVegetation, ["B4", "B3", "B2"]),
    (FalseColorComposite::Agriculture, ["B5", "B4", "B1"]),
    (FalseColorComposite::AtmosphericPenetration, ["B7", "B5", "B3"]),
    (FalseColorComposite::HealthyVegetation, ["B4", "B5", "B2"]),
    (FalseColorComposite::LandWater, ["B4", "B5", "B3"]),
    (FalseColorComposite::NaturalWithAtmosphericRemoval, ["B7", "B4", "B2"]),
    (FalseColorComposite::ShortwaveInfrared, ["B7", "B5", "B4"]),
    (FalseColorComposite::VegetationAnalysis, ["B5", "B4", "B3"]),
];

const L89_TOA_FALSE_COLOR: [TripleRow; 9] = [
    (FalseColorComposite::FalseColorUrban, ["B7", "B6", "B4"]),
    (FalseColorComposite::ColorInfraredVegetation, ["B5", "B4", "B3"]),
    (FalseColorComposite::Agriculture, ["B6", "B5", "B2"]),
    (FalseColorComposite::AtmosphericPenetration, ["B7", "B6", "B5"]),
    (FalseColorComposite::HealthyVegetation, ["B5", "B6", "B2"]),
    (FalseColorComposite::LandWater, ["B5", "B6", "B4"]),
    (FalseColorComposite::NaturalWithAtmosphericRemoval, ["B7", "B5", "B3"]),
    (FalseColorComposite::ShortwaveInfrared, ["B7", "B5", "B4"]),
    (FalseColorComposite::VegetationAnalysis, ["B6", "B5", "B4"]),
];

/// Natural-colour display triples.
const TRUE_COLOR: [(SensorVariant, [&str; 3]); 5] = [
    (SensorVariant::Sentinel2, ["B4", "B3", "B2"]),
    (SensorVariant::Landsat89Sr, ["SR_B4", "SR_B3", "SR_B2"]),
    (SensorVariant::Landsat7Sr, ["SR_B3", "SR_B2", "SR_B1"]),
    (SensorVariant::Landsat89Toa, ["B4", "B3", "B2"]),
    (SensorVariant::Landsat7Toa, ["B3", "B2", "B1"]),
];

/// The four optical bands used for PCA. Sentinel-2 takes the Landsat 7 TOA
/// names, which it carries too.
const PCA_BANDS: [(SensorVariant, [&str; 4]); 5] = [
    (SensorVariant::Sentinel2, ["B4", "B3", "B2", "B1"]),
    (SensorVariant::Landsat89Sr, ["SR_B5", "SR_B4", "SR_B3", "SR_B2"]),
    (SensorVariant::Landsat7Sr, ["SR_B4", "SR_B3", "SR_B2", "SR_B1"]),
    (SensorVariant::Landsat89Toa, ["B5", "B4", "B3", "B2"]),
    (SensorVariant::Landsat7Toa, ["B4", "B3", "B2", "B1"]),
];

const THERMAL_CANDIDATES: [&str; 2] = ["ST_B10", "ST_B6"];

pub const PCA_DISPLAY_RANGE: (f64, f64) = (-2.0, 2.0);
pub const LST_DISPLAY_RANGE: (f64, f64) = (15.0, 50.0);
pub const SUPERVISED_DISPLAY_RANGE: (f64, f64) = (0.0, 2.0);
pub const INDEX_FALLBACK_RANGE: (f64, f64) = (-1.0, 1.0);
pub const UNSUPERVISED_SAMPLE_SIZE: usize = 5000;

pub const LST_PALETTE: [&str; 29] = [
    "040274", "040281", "0502a3", "0502b8", "0502ce", "0502e6", "0602ff", "235cb1", "307ef3",
    "269db1", "30c8e2", "32d3ef", "3be285", "3ff38f", "86e26f", "3ae237", "b5e22e", "d6e21f",
    "fff705", "ffd611", "ffb613", "ff8b13", "ff6e08", "ff500d", "ff0000", "de0101", "c21301",
    "a71001", "911003",
];

const SUPERVISED_PALETTE: [&str; 3] = ["red", "green", "blue"];

const KNOWN_VARIANTS: [SensorVariant; 5] = [
    SensorVariant::Sentinel2,
    SensorVariant::Landsat7Sr,
    SensorVariant::Landsat7Toa,
    SensorVariant::Landsat89Sr,
    SensorVariant::Landsat89Toa,
];

type RecipeKey = (SensorVariant, ProductKind, Option<String>);

static TABLE: Lazy<BTreeMap<RecipeKey, Recipe>> = Lazy::new(build_table);

fn palette(colors: &[&str]) -> Option<Vec<String>> {
    Some(colors.iter().map(|c| c.to_string()).collect())
}

fn owned<const N: usize>(bands: [&str; N]) -> [String; N] {
    bands.map(str::to_string)
}

fn index_rows(variant: SensorVariant) -> &'static [IndexRow] {
    match variant {
        SensorVariant::Sentinel2 => &S2_INDICES,
        SensorVariant::Landsat7Sr => &L7_SR_INDICES,
        SensorVariant::Landsat89Sr => &L89_SR_INDICES,
        SensorVariant::Landsat7Toa => &L7_TOA_INDICES,
        SensorVariant::Landsat89Toa => &L89_TOA_INDICES,
        SensorVariant::Unknown => &[],
    }
}

fn false_color_rows(variant: SensorVariant) -> &'static [TripleRow] {
    match variant {
        SensorVariant::Sentinel2 => &S2_FALSE_COLOR,
        SensorVariant::Landsat7Sr => &L7_SR_FALSE_COLOR,
        SensorVariant::Landsat89Sr => &L89_SR_FALSE_COLOR,
        SensorVariant::Landsat7Toa => &L7_TOA_FALSE_COLOR,
        SensorVariant::Landsat89Toa => &L89_TOA_FALSE_COLOR,
        SensorVariant::Unknown => &[],
    }
}

fn build_table() -> BTreeMap<RecipeKey, Recipe> {
    let mut table = BTreeMap::new();

    for variant in KNOWN_VARIANTS {
        let Some(scale) = variant.scale() else {
            continue;
        };
        let mut insert = |kind: ProductKind, selector: Option<&str>, formula, palette, stretch| {
            let recipe = Recipe {
                variant,
                kind,
                selector: selector.map(str::to_string),
                formula,
                scale,
                palette,
                stretch,
            };
            table.insert((variant, kind, recipe.selector.clone()), recipe);
        };

        for &(index, a, b) in index_rows(variant) {
            let formula = match index {
                SpectralIndex::Rvi => Formula::Ratio {
                    numerator: a.to_string(),
                    denominator: b.to_string(),
                },
                _ => Formula::NormalizedDifference {
                    a: a.to_string(),
                    b: b.to_string(),
                },
            };
            let (min, max) = INDEX_FALLBACK_RANGE;
            insert(
                ProductKind::SpectralIndex,
                Some(index.name()),
                formula,
                palette(&index.palette()),
                StretchRule::PercentileOr { min, max },
            );
        }

        for &(composite, bands) in false_color_rows(variant) {
            insert(
                ProductKind::FalseColor,
                Some(composite.label()),
                Formula::Composite {
                    bands: owned(bands),
                },
                None,
                StretchRule::Percentile,
            );
        }

        if let Some((_, bands)) = PCA_BANDS.iter().find(|(v, _)| *v == variant) {
            let (min, max) = PCA_DISPLAY_RANGE;
            insert(
                ProductKind::Pca,
                None,
                Formula::Components {
                    bands: bands.iter().map(|b| b.to_string()).collect(),
                },
                None,
                StretchRule::Fixed { min, max },
            );
        }

        if variant == SensorVariant::Landsat89Toa {
            insert(
                ProductKind::Pansharpen,
                None,
                Formula::Pansharpen {
                    rgb: owned(["B4", "B3", "B2"]),
                    pan: "B8".to_string(),
                },
                None,
                StretchRule::Percentile,
            );
        }

        insert(
            ProductKind::UnsupervisedClassify,
            None,
            Formula::Clustering {
                sample_size: UNSUPERVISED_SAMPLE_SIZE,
            },
            None,
            StretchRule::RandomColors,
        );

        if matches!(variant, SensorVariant::Landsat89Sr | SensorVariant::Landsat7Sr) {
            let (min, max) = LST_DISPLAY_RANGE;
            insert(
                ProductKind::Lst,
                None,
                Formula::SurfaceTemperature {
                    candidates: THERMAL_CANDIDATES.iter().map(|b| b.to_string()).collect(),
                },
                palette(&LST_PALETTE),
                StretchRule::Fixed { min, max },
            );
        }
    }

    table
}

/// Feature bands of the pre-trained land-cover models, by sensor tag.
fn supervised_features(tag: &str) -> &'static [&'static str] {
    match tag {
        "L7SR" => &["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7"],
        "L8SR" | "L9SR" => &["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"],
        "L7TOA" => &["B1", "B2", "B3", "B4", "B5", "B7", "B8"],
        "L8TOA" | "L9TOA" => &["B2", "B3", "B4", "B5", "B6", "B7", "B10", "B11"],
        _ => &[],
    }
}

/// Read-only view over the recipe table plus the model asset root used for
/// supervised recipes.
#[derive(Debug, Clone)]
pub struct RecipeRegistry {
    model_root: String,
}

impl Default for RecipeRegistry {
    fn default() -> Self {
        Self::new(crate::core::params::DEFAULT_MODEL_ROOT)
    }
}

impl RecipeRegistry {
    pub fn new(model_root: impl Into<String>) -> Self {
        Self {
            model_root: model_root.into(),
        }
    }

    pub fn model_root(&self) -> &str {
        &self.model_root
    }

    /// Look up the recipe for `variant` × `kind`. Spectral indices and false
    /// colour composites need a selector (index name or composite label).
    ///
    /// Supervised classification needs the satellite id as well; use
    /// [`lookup_supervised`](Self::lookup_supervised).
    pub fn lookup(
        &self,
        variant: SensorVariant,
        kind: ProductKind,
        selector: Option<&str>,
    ) -> Result<Recipe> {
        if variant == SensorVariant::Unknown {
            return Err(Error::unsupported(variant, kind, selector));
        }

        let canonical = match kind {
            ProductKind::SpectralIndex => selector
                .and_then(|s| s.parse::<SpectralIndex>().ok())
                .map(|i| i.name().to_string()),
            ProductKind::FalseColor => selector
                .and_then(|s| s.parse::<FalseColorComposite>().ok())
                .map(|c| c.label().to_string()),
            ProductKind::SupervisedClassify => {
                let algorithm = selector
                    .map(str::parse::<SupervisedAlgorithm>)
                    .transpose()?
                    .unwrap_or(SupervisedAlgorithm::RandomForest);
                return self.lookup_supervised(variant, None, algorithm);
            }
            _ => None,
        };

        let needs_selector = matches!(kind, ProductKind::SpectralIndex | ProductKind::FalseColor);
        if needs_selector && canonical.is_none() {
            return Err(Error::unsupported(variant, kind, selector));
        }

        let recipe = TABLE
            .get(&(variant, kind, canonical))
            .cloned()
            .ok_or_else(|| Error::unsupported(variant, kind, selector))?;
        debug!(
            "Recipe for {} / {}: {:?} at {} m",
            variant, kind, recipe.formula, recipe.scale
        );
        Ok(recipe)
    }

    pub fn spectral_index(&self, variant: SensorVariant, index: SpectralIndex) -> Result<Recipe> {
        self.lookup(variant, ProductKind::SpectralIndex, Some(index.name()))
    }

    pub fn false_color(
        &self,
        variant: SensorVariant,
        composite: FalseColorComposite,
    ) -> Result<Recipe> {
        self.lookup(variant, ProductKind::FalseColor, Some(composite.label()))
    }

    /// Supervised recipe keyed by processing level (from `variant`) and the
    /// scene's `SPACECRAFT_ID`.
    pub fn lookup_supervised(
        &self,
        variant: SensorVariant,
        satellite_id: Option<&str>,
        algorithm: SupervisedAlgorithm,
    ) -> Result<Recipe> {
        let kind = ProductKind::SupervisedClassify;
        if !variant.is_landsat() {
            return Err(Error::unsupported(variant, kind, Some(algorithm.tag())));
        }
        let Some(level) = variant.processing_level() else {
            return Err(Error::unsupported(variant, kind, Some(algorithm.tag())));
        };

        let satellite = satellite_id.ok_or_else(|| {
            Error::UnrecognizedImageType("image has no SPACECRAFT_ID".to_string())
        })?;
        let generation = match satellite {
            "LANDSAT_7" => "L7",
            "LANDSAT_8" => "L8",
            "LANDSAT_9" => "L9",
            other => {
                return Err(Error::UnrecognizedImageType(format!(
                    "unsupported satellite {other}"
                )));
            }
        };
        let sensor_tag = match level {
            ProcessingLevel::SurfaceReflectance => format!("{generation}SR"),
            ProcessingLevel::Toa => format!("{generation}TOA"),
        };

        let model_id = format!("{}_{}", sensor_tag, algorithm.tag());
        let root = self.model_root.trim_end_matches('/');
        let model_asset = if root.is_empty() {
            model_id
        } else {
            format!("{root}/{model_id}")
        };
        let (min, max) = SUPERVISED_DISPLAY_RANGE;
        let scale = variant.scale().unwrap_or(30.0);

        debug!("Supervised recipe {} -> {}", sensor_tag, model_asset);
        Ok(Recipe {
            variant,
            kind,
            selector: Some(algorithm.tag().to_string()),
            formula: Formula::Classifier {
                features: supervised_features(&sensor_tag)
                    .iter()
                    .map(|b| b.to_string())
                    .collect(),
                model_asset,
            },
            scale,
            palette: palette(&SUPERVISED_PALETTE),
            stretch: StretchRule::Fixed { min, max },
        })
    }

    /// Selector values available for `variant` × `kind`, in table order.
    pub fn selectors(&self, variant: SensorVariant, kind: ProductKind) -> Vec<&'static str> {
        match kind {
            ProductKind::SpectralIndex => index_rows(variant).iter().map(|r| r.0.name()).collect(),
            ProductKind::FalseColor => false_color_rows(variant)
                .iter()
                .map(|r| r.0.label())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn true_color_bands(&self, variant: SensorVariant) -> Result<[&'static str; 3]> {
        TRUE_COLOR
            .iter()
            .find(|(v, _)| *v == variant)
            .map(|(_, bands)| *bands)
            .ok_or_else(|| Error::unsupported(variant, ProductKind::FalseColor, Some("True Color")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bands::BandSet;
    use crate::core::resolver::SensorFormatResolver;

    fn registry() -> RecipeRegistry {
        RecipeRegistry::new("models")
    }

    #[test]
    fn ndvi_bands_per_variant() {
        let r = registry();
        let s2 = r.lookup(SensorVariant::Sentinel2, ProductKind::SpectralIndex, Some("NDVI")).unwrap();
        assert_eq!(s2.input_bands(), vec!["B8", "B4"]);
        assert_eq!(s2.scale, 10.0);

        let l89 = r.lookup(SensorVariant::Landsat89Sr, ProductKind::SpectralIndex, Some("NDVI")).unwrap();
        assert_eq!(l89.input_bands(), vec!["SR_B5", "SR_B4"]);
        assert_eq!(l89.scale, 30.0);

        let l7 = r.spectral_index(SensorVariant::Landsat7Sr, SpectralIndex::Ndvi).unwrap();
        assert_eq!(l7.input_bands(), vec!["SR_B4", "SR_B3"]);

        let l7_toa = r.spectral_index(SensorVariant::Landsat7Toa, SpectralIndex::Ndvi).unwrap();
        assert_eq!(l7_toa.input_bands(), vec!["B4", "B3"]);
    }

    #[test]
    fn rvi_is_a_ratio_expression() {
        let recipe = registry()
            .spectral_index(SensorVariant::Landsat89Sr, SpectralIndex::Rvi)
            .unwrap();
        assert!(matches!(recipe.formula, Formula::Ratio { .. }));
        assert_eq!(recipe.expression().as_deref(), Some("SR_B5 / SR_B4"));

        let ndwi = registry()
            .spectral_index(SensorVariant::Landsat89Sr, SpectralIndex::Ndwi)
            .unwrap();
        assert!(ndwi.expression().is_none());
    }

    #[test]
    fn unknown_variant_never_has_a_recipe() {
        let r = registry();
        for kind in [
            ProductKind::FalseColor,
            ProductKind::SpectralIndex,
            ProductKind::Pca,
            ProductKind::Pansharpen,
            ProductKind::UnsupervisedClassify,
            ProductKind::SupervisedClassify,
            ProductKind::Lst,
        ] {
            let err = r.lookup(SensorVariant::Unknown, kind, Some("NDVI")).unwrap_err();
            assert!(matches!(err, Error::UnsupportedCombination { .. }), "{kind}");
        }
    }

    #[test]
    fn pansharpen_only_for_landsat89_toa() {
        let r = registry();
        let recipe = r.lookup(SensorVariant::Landsat89Toa, ProductKind::Pansharpen, None).unwrap();
        assert_eq!(recipe.input_bands(), vec!["B4", "B3", "B2", "B8"]);
        for variant in [
            SensorVariant::Sentinel2,
            SensorVariant::Landsat7Sr,
            SensorVariant::Landsat7Toa,
            SensorVariant::Landsat89Sr,
        ] {
            assert!(r.lookup(variant, ProductKind::Pansharpen, None).is_err());
        }
    }

    #[test]
    fn false_color_triples_differ_across_variants() {
        let r = registry();
        let agri = |v| {
            r.false_color(v, FalseColorComposite::Agriculture)
                .unwrap()
                .input_bands()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        assert_eq!(agri(SensorVariant::Sentinel2), ["B11", "B8", "B2"]);
        assert_eq!(agri(SensorVariant::Landsat7Sr), ["SR_B5", "SR_B4", "SR_B1"]);
        assert_eq!(agri(SensorVariant::Landsat89Sr), ["SR_B6", "SR_B5", "SR_B2"]);
        assert_eq!(agri(SensorVariant::Landsat7Toa), ["B5", "B4", "B1"]);
        assert_eq!(agri(SensorVariant::Landsat89Toa), ["B6", "B5", "B2"]);
    }

    #[test]
    fn false_color_names_are_variant_specific() {
        let r = registry();
        assert_eq!(r.selectors(SensorVariant::Sentinel2, ProductKind::FalseColor).len(), 10);
        assert_eq!(r.selectors(SensorVariant::Landsat89Sr, ProductKind::FalseColor).len(), 9);
        assert!(r.false_color(SensorVariant::Landsat89Sr, FalseColorComposite::Geology).is_err());
        assert!(r
            .false_color(SensorVariant::Sentinel2, FalseColorComposite::AtmosphericPenetration)
            .is_err());
        // Sentinel-2 spelling resolves to the shared composite.
        let urban = r
            .lookup(SensorVariant::Sentinel2, ProductKind::FalseColor, Some("False Color Urban"))
            .unwrap();
        assert_eq!(urban.input_bands(), vec!["B12", "B11", "B4"]);
    }

    #[test]
    fn selector_is_required_for_indices_and_composites() {
        let r = registry();
        assert!(r.lookup(SensorVariant::Sentinel2, ProductKind::SpectralIndex, None).is_err());
        assert!(r.lookup(SensorVariant::Sentinel2, ProductKind::SpectralIndex, Some("EVI")).is_err());
        assert!(r.lookup(SensorVariant::Sentinel2, ProductKind::FalseColor, None).is_err());
    }

    #[test]
    fn pca_uses_four_broadband_bands() {
        let r = registry();
        for variant in KNOWN_VARIANTS {
            let recipe = r.lookup(variant, ProductKind::Pca, None).unwrap();
            assert_eq!(recipe.input_bands().len(), 4, "{variant}");
        }
        let l7 = r.lookup(SensorVariant::Landsat7Sr, ProductKind::Pca, None).unwrap();
        assert_eq!(l7.input_bands(), vec!["SR_B4", "SR_B3", "SR_B2", "SR_B1"]);
    }

    #[test]
    fn sentinel2_pca_matches_the_unhinted_layout() {
        let r = registry();
        let s2 = r.lookup(SensorVariant::Sentinel2, ProductKind::Pca, None).unwrap();
        assert_eq!(s2.input_bands(), vec!["B4", "B3", "B2", "B1"]);

        let bands = BandSet::new(["B1", "B2", "B3", "B4", "B8", "B11", "B12"]);
        let unhinted = SensorFormatResolver::new().resolve(None, &bands);
        assert_eq!(unhinted, SensorVariant::Landsat7Toa);
        let l7 = r.lookup(unhinted, ProductKind::Pca, None).unwrap();
        assert_eq!(s2.input_bands(), l7.input_bands());
    }

    #[test]
    fn lst_needs_surface_temperature_bands() {
        let r = registry();
        let recipe = r.lookup(SensorVariant::Landsat89Sr, ProductKind::Lst, None).unwrap();
        assert_eq!(recipe.input_bands(), vec!["ST_B10", "ST_B6"]);
        assert_eq!(recipe.palette.as_ref().map(Vec::len), Some(29));
        assert!(r.lookup(SensorVariant::Landsat89Toa, ProductKind::Lst, None).is_err());
        assert!(r.lookup(SensorVariant::Sentinel2, ProductKind::Lst, None).is_err());
    }

    #[test]
    fn supervised_recipe_by_satellite_and_level() {
        let r = registry();
        let recipe = r
            .lookup_supervised(
                SensorVariant::Landsat89Sr,
                Some("LANDSAT_9"),
                SupervisedAlgorithm::ExtraTrees,
            )
            .unwrap();
        match recipe.formula {
            Formula::Classifier {
                features,
                model_asset,
            } => {
                assert_eq!(features.len(), 7);
                assert_eq!(model_asset, "models/L9SR_extratrees");
            }
            other => panic!("unexpected formula {other:?}"),
        }

        let toa = r
            .lookup_supervised(
                SensorVariant::Landsat7Toa,
                Some("LANDSAT_7"),
                SupervisedAlgorithm::RandomForest,
            )
            .unwrap();
        assert_eq!(toa.input_bands(), vec!["B1", "B2", "B3", "B4", "B5", "B7", "B8"]);
    }

    #[test]
    fn supervised_rejects_missing_or_foreign_satellite() {
        let r = registry();
        let missing = r
            .lookup_supervised(SensorVariant::Landsat89Sr, None, SupervisedAlgorithm::RandomForest)
            .unwrap_err();
        assert!(matches!(missing, Error::UnrecognizedImageType(_)));

        let foreign = r
            .lookup_supervised(
                SensorVariant::Landsat89Sr,
                Some("SENTINEL_2A"),
                SupervisedAlgorithm::RandomForest,
            )
            .unwrap_err();
        assert!(matches!(foreign, Error::UnrecognizedImageType(_)));

        let s2 = r
            .lookup_supervised(
                SensorVariant::Sentinel2,
                Some("LANDSAT_8"),
                SupervisedAlgorithm::RandomForest,
            )
            .unwrap_err();
        assert!(matches!(s2, Error::UnsupportedCombination { .. }));
    }

    #[test]
    fn true_color_per_variant() {
        let r = registry();
        assert_eq!(r.true_color_bands(SensorVariant::Landsat7Sr).unwrap(), ["SR_B3", "SR_B2", "SR_B1"]);
        assert!(r.true_color_bands(SensorVariant::Unknown).is_err());
    }
}
