//! Product dispatch: resolve the image's band layout, look up the recipe and
//! run it on the backend, returning the derived image and its display
//! parameters.
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::backend::{Backend, ClustererSpec, Geometry, RasterImage, Reducer};
use crate::core::params::{PcaBandPolicy, ProductRequest, Settings};
use crate::core::processing::composite::Composite;
use crate::core::processing::pca::principal_components;
use crate::core::recipes::{Formula, Recipe, RecipeRegistry, StretchRule};
use crate::core::resolver::SensorFormatResolver;
use crate::core::stretch::{
    StretchCalculator, VisualizationParams, VisualizationRange, percentiles_from_reduction,
};
use crate::error::{Error, Result};
use crate::types::{ClusterAlgorithm, ImageSource, ProductKind, SensorVariant};

/// Scene property naming the satellite that acquired it.
pub const SPACECRAFT_PROPERTY: &str = "SPACECRAFT_ID";

pub const KELVIN_OFFSET: f64 = 273.15;
pub const LST_BAND: &str = "LST";

const STRETCH_PERCENTILES: [u8; 2] = [2, 98];
const PANSHARPEN_BANDS: [&str; 3] = ["red", "green", "blue"];
const RANDOM_COLOR_BANDS: [&str; 3] = ["vis-red", "vis-green", "vis-blue"];

/// The image a product tab works on, with the caller's hints.
#[derive(Debug, Clone)]
pub struct SelectedImage<I> {
    pub image: I,
    /// `Sentinel2` skips band inspection.
    pub source: Option<ImageSource>,
    /// Region for statistics and sampling; defaults to the image footprint.
    pub region: Option<Geometry>,
}

impl<I: RasterImage> SelectedImage<I> {
    pub fn new(image: I) -> Self {
        Self {
            image,
            source: None,
            region: None,
        }
    }

    pub fn with_source(mut self, source: ImageSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_region(mut self, region: Geometry) -> Self {
        self.region = Some(region);
        self
    }

    pub fn from_composite(composite: Composite<I>, region: Geometry) -> Self {
        let source = composite.source();
        Self::new(composite.image)
            .with_source(source)
            .with_region(region)
    }

    pub fn region(&self) -> Option<Geometry> {
        self.region.clone().or_else(|| self.image.footprint())
    }
}

#[derive(Debug, Clone)]
pub struct ProductOutput<I> {
    pub kind: ProductKind,
    pub variant: SensorVariant,
    pub recipe: Recipe,
    /// The product itself (index values, components, class ids, °C, ...).
    pub image: I,
    /// Separate display rendering, when the product image is not itself
    /// meant to be shown (random cluster colours).
    pub display: Option<I>,
    pub vis: VisualizationParams,
    /// Scalar results reported alongside the image, e.g. LST mean/min/max.
    pub summary: BTreeMap<String, f64>,
}

pub struct ProductPipeline<'a, B: Backend> {
    backend: &'a B,
    registry: &'a RecipeRegistry,
    settings: &'a Settings,
    resolver: SensorFormatResolver,
}

impl<'a, B: Backend> ProductPipeline<'a, B> {
    pub fn new(backend: &'a B, registry: &'a RecipeRegistry, settings: &'a Settings) -> Self {
        Self {
            backend,
            registry,
            settings,
            resolver: SensorFormatResolver::new(),
        }
    }

    pub fn run(
        &self,
        selected: &SelectedImage<B::Image>,
        request: &ProductRequest,
    ) -> Result<ProductOutput<B::Image>> {
        request.validate()?;
        let image = &selected.image;
        let variant = self
            .resolver
            .resolve_known(selected.source, &image.band_set())?;
        let region = selected
            .region()
            .ok_or(Error::MissingPrerequisite { step: "region selection" })?;
        info!("Running {} on {}", request.kind(), variant);

        match request {
            ProductRequest::FalseColor { composite } => {
                let recipe = self.registry.false_color(variant, *composite)?;
                self.false_color(image, recipe, &region)
            }
            ProductRequest::SpectralIndex { index } => {
                let recipe = self.registry.spectral_index(variant, *index)?;
                self.spectral_index(image, recipe, index.name(), &region)
            }
            ProductRequest::Pca { policy } => {
                let recipe = self.registry.lookup(variant, ProductKind::Pca, None)?;
                self.pca(image, recipe, *policy, &region)
            }
            ProductRequest::Pansharpen => {
                let recipe = self.registry.lookup(variant, ProductKind::Pansharpen, None)?;
                self.pansharpen(image, recipe, &region)
            }
            ProductRequest::UnsupervisedClassify {
                algorithm,
                clusters,
            } => {
                let recipe = self
                    .registry
                    .lookup(variant, ProductKind::UnsupervisedClassify, None)?;
                self.unsupervised(image, recipe, *algorithm, *clusters, &region)
            }
            ProductRequest::SupervisedClassify { algorithm } => {
                let satellite = image.property_str(SPACECRAFT_PROPERTY);
                let recipe =
                    self.registry
                        .lookup_supervised(variant, satellite.as_deref(), *algorithm)?;
                self.supervised(image, recipe)
            }
            ProductRequest::Lst => {
                let recipe = self.registry.lookup(variant, ProductKind::Lst, None)?;
                self.lst(image, recipe, &region)
            }
        }
    }

    fn false_color(
        &self,
        image: &B::Image,
        recipe: Recipe,
        region: &Geometry,
    ) -> Result<ProductOutput<B::Image>> {
        let Formula::Composite { bands } = &recipe.formula else {
            return Err(formula_mismatch(&recipe));
        };
        let names: Vec<&str> = bands.iter().map(String::as_str).collect();
        let selected = image.select(&names)?;
        let range = percentile_stretch(&selected, bands, region, recipe.scale)?;
        Ok(output(recipe, selected, range.into()))
    }

    fn spectral_index(
        &self,
        image: &B::Image,
        recipe: Recipe,
        name: &str,
        region: &Geometry,
    ) -> Result<ProductOutput<B::Image>> {
        let computed = match &recipe.formula {
            Formula::NormalizedDifference { a, b } => image.normalized_difference(a, b)?,
            Formula::Ratio { .. } => {
                let expr = recipe
                    .expression()
                    .ok_or_else(|| formula_mismatch(&recipe))?;
                image.expression(&expr)?
            }
            _ => return Err(formula_mismatch(&recipe)),
        };
        let index = computed.rename(&[name])?;

        let fallback = match recipe.stretch {
            StretchRule::PercentileOr { min, max } => (min, max),
            _ => crate::core::recipes::INDEX_FALLBACK_RANGE,
        };
        let stats = index
            .reduce_region(
                &Reducer::Percentile(STRETCH_PERCENTILES.to_vec()),
                region,
                recipe.scale,
                true,
            )?
            .into_values()?;
        let (min, max) =
            StretchCalculator::new().compute_single(&percentiles_from_reduction(&stats), name, fallback);
        debug!("{} display range {}..{}", name, min, max);

        let vis = VisualizationParams::ranged(vec![name.to_string()], min, max)
            .with_palette(recipe.palette.clone());
        Ok(output(recipe, index, vis))
    }

    fn pca(
        &self,
        image: &B::Image,
        recipe: Recipe,
        policy: PcaBandPolicy,
        region: &Geometry,
    ) -> Result<ProductOutput<B::Image>> {
        let bands: Vec<String> = match policy {
            PcaBandPolicy::Recipe => recipe.input_bands().into_iter().map(str::to_string).collect(),
            PcaBandPolicy::AllBands => {
                warn!("PCA over every band of the image on request");
                image.band_names()
            }
        };
        let pca = principal_components(self.backend, image, &bands, region, recipe.scale)?;

        let display: Vec<String> = pca.image.band_names().into_iter().take(3).collect();
        let (min, max) = match recipe.stretch {
            StretchRule::Fixed { min, max } => (min, max),
            _ => crate::core::recipes::PCA_DISPLAY_RANGE,
        };
        let vis = VisualizationParams::ranged(display, min, max);
        let mut out = output(recipe, pca.image, vis);
        out.summary = out
            .image
            .band_names()
            .into_iter()
            .zip(pca.eigenvalues)
            .map(|(pc, value)| (format!("{pc}_eigenvalue"), value))
            .collect();
        Ok(out)
    }

    fn pansharpen(
        &self,
        image: &B::Image,
        recipe: Recipe,
        region: &Geometry,
    ) -> Result<ProductOutput<B::Image>> {
        let Formula::Pansharpen { rgb, pan } = &recipe.formula else {
            return Err(formula_mismatch(&recipe));
        };
        let rgb_names: Vec<&str> = rgb.iter().map(String::as_str).collect();
        let hsv = image.select(&rgb_names)?.rgb_to_hsv()?;
        let value = image.select(&[pan.as_str()])?.rename(&["value"])?;
        let sharpened = hsv
            .select(&["hue", "saturation"])?
            .add_bands(&value, false)?
            .hsv_to_rgb()?;
        debug!("Pansharpened {:?} with {}", rgb, pan);

        let display = PANSHARPEN_BANDS.map(str::to_string);
        let range = percentile_stretch(&sharpened, &display, region, recipe.scale)?;
        Ok(output(recipe, sharpened, range.into()))
    }

    fn unsupervised(
        &self,
        image: &B::Image,
        recipe: Recipe,
        algorithm: ClusterAlgorithm,
        clusters: usize,
        region: &Geometry,
    ) -> Result<ProductOutput<B::Image>> {
        let Formula::Clustering { .. } = recipe.formula else {
            return Err(formula_mismatch(&recipe));
        };
        // The configured sample size wins over the recipe default.
        let defaults = &self.settings.unsupervised;
        let samples = image.sample(
            region,
            defaults.sample_scale,
            defaults.sample_size,
            defaults.seed,
        )?;
        if samples.is_empty() {
            return Err(Error::EmptyResult(
                "no pixels to sample in the region".to_string(),
            ));
        }

        let max_clusters = match algorithm {
            ClusterAlgorithm::KMeans => clusters,
            ClusterAlgorithm::CascadeKMeans | ClusterAlgorithm::XMeans => {
                defaults.max_clusters.max(clusters)
            }
        };
        let spec = ClustererSpec {
            algorithm,
            min_clusters: clusters,
            max_clusters,
            seed: defaults.seed,
        };
        info!(
            "{} on {} samples, clusters {}..={}",
            algorithm,
            samples.len(),
            clusters,
            max_clusters
        );
        let clusterer = self.backend.train_clusterer(&spec, &samples)?;
        let classes = self.backend.cluster(&clusterer, image)?;
        let colors = classes.random_visualizer()?;

        let vis = VisualizationParams {
            bands: RANDOM_COLOR_BANDS.iter().map(|b| b.to_string()).collect(),
            ..Default::default()
        };
        let mut out = output(recipe, classes, vis);
        out.display = Some(colors);
        out.summary.insert("samples".to_string(), samples.len() as f64);
        Ok(out)
    }

    fn supervised(&self, image: &B::Image, recipe: Recipe) -> Result<ProductOutput<B::Image>> {
        let Formula::Classifier {
            features,
            model_asset,
        } = &recipe.formula
        else {
            return Err(formula_mismatch(&recipe));
        };
        let names: Vec<&str> = features.iter().map(String::as_str).collect();
        let inputs = image.select(&names)?;
        let model = self.backend.load_classifier(model_asset)?;
        info!("Classifying with {}", model_asset);
        let classified = self.backend.classify(&model, &inputs)?;

        let (min, max) = match recipe.stretch {
            StretchRule::Fixed { min, max } => (min, max),
            _ => crate::core::recipes::SUPERVISED_DISPLAY_RANGE,
        };
        let vis = VisualizationParams::ranged(classified.band_names(), min, max)
            .with_palette(recipe.palette.clone());
        Ok(output(recipe, classified, vis))
    }

    fn lst(
        &self,
        image: &B::Image,
        recipe: Recipe,
        region: &Geometry,
    ) -> Result<ProductOutput<B::Image>> {
        let Formula::SurfaceTemperature { candidates } = &recipe.formula else {
            return Err(formula_mismatch(&recipe));
        };
        let bands = image.band_set();
        let thermal = candidates
            .iter()
            .find(|c| bands.contains(c))
            .ok_or_else(|| Error::BandNotFound {
                band: candidates.join(" or "),
                available: bands.to_string(),
            })?;
        debug!("LST from {}", thermal);

        let celsius = image
            .select(&[thermal.as_str()])?
            .affine(1.0, -KELVIN_OFFSET)
            .rename(&[LST_BAND])?;

        let mean = celsius
            .reduce_region(&Reducer::Mean, region, recipe.scale, true)?
            .into_values()?;
        let extremes = celsius
            .reduce_region(&Reducer::MinMax, region, recipe.scale, true)?
            .into_values()?;
        let mut summary = BTreeMap::new();
        for (key, value) in [
            ("mean", mean.get(LST_BAND)),
            ("min", extremes.get(&format!("{LST_BAND}_min"))),
            ("max", extremes.get(&format!("{LST_BAND}_max"))),
        ] {
            let value = value.copied().ok_or_else(|| {
                Error::EmptyResult("no valid thermal pixels in the region".to_string())
            })?;
            summary.insert(key.to_string(), value);
        }
        info!(
            "LST mean {:.2} °C, min {:.2} °C, max {:.2} °C",
            summary["mean"], summary["min"], summary["max"]
        );

        let (min, max) = match recipe.stretch {
            StretchRule::Fixed { min, max } => (min, max),
            _ => crate::core::recipes::LST_DISPLAY_RANGE,
        };
        let vis = VisualizationParams::ranged(vec![LST_BAND.to_string()], min, max)
            .with_palette(recipe.palette.clone());
        let mut out = output(recipe, celsius, vis);
        out.summary = summary;
        Ok(out)
    }
}

fn output<I>(recipe: Recipe, image: I, vis: VisualizationParams) -> ProductOutput<I> {
    ProductOutput {
        kind: recipe.kind,
        variant: recipe.variant,
        recipe,
        image,
        display: None,
        vis,
        summary: BTreeMap::new(),
    }
}

fn formula_mismatch(recipe: &Recipe) -> Error {
    Error::unsupported(recipe.variant, recipe.kind, recipe.selector.as_deref())
}

/// Shared 2nd/98th percentile range over a band triple.
pub fn percentile_stretch<I: RasterImage>(
    image: &I,
    bands: &[String; 3],
    region: &Geometry,
    scale: f64,
) -> Result<VisualizationRange> {
    let names: Vec<&str> = bands.iter().map(String::as_str).collect();
    let stats = image
        .select(&names)?
        .reduce_region(
            &Reducer::Percentile(STRETCH_PERCENTILES.to_vec()),
            region,
            scale,
            true,
        )?
        .into_values()?;
    Ok(StretchCalculator::new().compute(&percentiles_from_reduction(&stats), bands))
}
