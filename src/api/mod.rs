//! High-level library API: resolve a band layout, fetch recipes, build
//! composites and run derived products, plus a per-tab `ProductSession` that
//! keeps the selected image and last result together. Prefer these entry
//! points over the `core` modules when integrating bandwise.
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::backend::{Backend, ExportRequest, ExportTask, Geometry, RasterImage};
use crate::core::bands::BandSet;
use crate::core::params::{ProductRequest, Settings};
use crate::core::processing::composite::{Composite, CompositeBuilder, CompositeRequest};
use crate::core::processing::pipeline::{
    ProductOutput, ProductPipeline, SelectedImage, percentile_stretch,
};
use crate::core::recipes::{Recipe, RecipeRegistry};
use crate::core::resolver::SensorFormatResolver;
use crate::core::stretch::{BandPercentiles, StretchCalculator, VisualizationParams, VisualizationRange};
use crate::error::{Error, Result};
use crate::types::{ImageSource, ProductKind, SensorVariant, SupervisedAlgorithm};

/// Classify a band list. `Unknown` means no product can be computed.
pub fn resolve_variant(source: Option<ImageSource>, bands: &BandSet) -> SensorVariant {
    SensorFormatResolver::new().resolve(source, bands)
}

/// Recipe for `variant` × `kind`. For supervised classification the selector
/// is the algorithm tag (random forest when absent) and `satellite_id` is the
/// scene's `SPACECRAFT_ID`, which the model asset is named after.
pub fn get_recipe(
    registry: &RecipeRegistry,
    variant: SensorVariant,
    kind: ProductKind,
    selector: Option<&str>,
    satellite_id: Option<&str>,
) -> Result<Recipe> {
    match kind {
        ProductKind::SupervisedClassify => {
            let algorithm = selector
                .map(str::parse::<SupervisedAlgorithm>)
                .transpose()?
                .unwrap_or(SupervisedAlgorithm::RandomForest);
            registry.lookup_supervised(variant, satellite_id, algorithm)
        }
        _ => registry.lookup(variant, kind, selector),
    }
}

pub fn compute_stretch(
    stats: &BTreeMap<String, BandPercentiles>,
    bands: &[String; 3],
) -> VisualizationRange {
    StretchCalculator::new().compute(stats, bands)
}

/// `Ok(None)` when nothing matches the filters; report it as an empty
/// result rather than a failure.
pub fn build_composite<B: Backend>(
    backend: &B,
    request: &CompositeRequest,
) -> Result<Option<Composite<B::Image>>> {
    CompositeBuilder::new(backend).build(request)
}

/// True-colour display parameters for a composite, stretched over `region`.
pub fn preview_composite<B: Backend>(
    registry: &RecipeRegistry,
    composite: &Composite<B::Image>,
    region: &Geometry,
) -> Result<VisualizationParams> {
    let variant = SensorFormatResolver::new()
        .resolve_known(Some(composite.source()), &composite.bands())?;
    let bands = registry.true_color_bands(variant)?.map(str::to_string);
    let scale = variant.scale().unwrap_or(30.0);
    let range = percentile_stretch(&composite.image, &bands, region, scale)?;
    info!(
        "Preview {}: {:?} {}..{}",
        composite.product, range.bands, range.min, range.max
    );
    Ok(range.into())
}

pub fn run_product<B: Backend>(
    backend: &B,
    registry: &RecipeRegistry,
    settings: &Settings,
    selected: &SelectedImage<B::Image>,
    request: &ProductRequest,
) -> Result<ProductOutput<B::Image>> {
    ProductPipeline::new(backend, registry, settings).run(selected, request)
}

/// Build an export request from the configured defaults.
pub fn export_request(
    settings: &Settings,
    name: &str,
    region: Option<Geometry>,
    visualization: Option<VisualizationParams>,
) -> ExportRequest {
    let defaults = &settings.export;
    ExportRequest {
        description: name.to_string(),
        folder: defaults.folder.clone(),
        file_name_prefix: name.to_string(),
        scale: defaults.scale,
        crs: defaults.crs.clone(),
        max_pixels: defaults.max_pixels,
        region,
        visualization,
    }
}

/// Export name used when the caller gives none.
pub fn default_export_name(kind: ProductKind) -> &'static str {
    match kind {
        ProductKind::FalseColor => "FalseColor_Export",
        ProductKind::SpectralIndex => "SpectralIndices_Export",
        ProductKind::Pca => "PCA_Export",
        ProductKind::Pansharpen => "Pansharpen_Export",
        ProductKind::UnsupervisedClassify => "Unsupervised_Export",
        ProductKind::SupervisedClassify => "Supervised_Export",
        ProductKind::Lst => "LST_Export",
    }
}

/// State of one product tab: the selected image and the last derived
/// product. Selecting a new image discards the previous result.
pub struct ProductSession<B: Backend> {
    registry: RecipeRegistry,
    settings: Settings,
    selected: Option<SelectedImage<B::Image>>,
    result: Option<ProductOutput<B::Image>>,
}

impl<B: Backend> ProductSession<B> {
    pub fn new(settings: Settings) -> Self {
        Self {
            registry: RecipeRegistry::new(settings.model_root.clone()),
            settings,
            selected: None,
            result: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn select_image(&mut self, selected: SelectedImage<B::Image>) -> SensorVariant {
        if self.result.take().is_some() {
            debug!("Discarding previous result");
        }
        let variant = resolve_variant(selected.source, &selected.image.band_set());
        info!("Selected image resolves to {}", variant);
        self.selected = Some(selected);
        variant
    }

    pub fn selected(&self) -> Option<&SelectedImage<B::Image>> {
        self.selected.as_ref()
    }

    pub fn result(&self) -> Option<&ProductOutput<B::Image>> {
        self.result.as_ref()
    }

    /// Run `request` on the selected image. A failed run leaves no result.
    pub fn compute(
        &mut self,
        backend: &B,
        request: &ProductRequest,
    ) -> Result<&ProductOutput<B::Image>> {
        self.result = None;
        let selected = self.selected.as_ref().ok_or(Error::MissingPrerequisite {
            step: "image selection",
        })?;
        let output = run_product(backend, &self.registry, &self.settings, selected, request)?;
        Ok(self.result.insert(output))
    }

    /// Display parameters of the last result.
    pub fn preview(&self) -> Result<&VisualizationParams> {
        self.computed().map(|out| &out.vis)
    }

    /// Submit the last result for export; does not wait for it to finish.
    pub fn export(&self, backend: &B, name: Option<&str>) -> Result<ExportTask> {
        let output = self.computed()?;
        let name = name.unwrap_or(default_export_name(output.kind));
        let region = self.selected.as_ref().and_then(|s| s.region.clone());
        let request = export_request(&self.settings, name, region, Some(output.vis.clone()));
        info!("Exporting {} as {}", output.kind, name);
        backend.export(&output.image, &request)
    }

    fn computed(&self) -> Result<&ProductOutput<B::Image>> {
        self.result.as_ref().ok_or(Error::MissingPrerequisite {
            step: "product computation",
        })
    }
}
