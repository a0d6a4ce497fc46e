#![doc = r#"
bandwise — sensor-format resolution and derived-product recipes for Sentinel-2
and Landsat imagery.

Given the band names of an image, bandwise works out which sensor layout it
uses (Sentinel-2, Landsat 7 or Landsat 8/9, surface reflectance or TOA), then
picks the exact bands, formula, scale and display stretch for a derived
product: false colour composites, spectral indices, principal components,
pansharpening, unsupervised and supervised classification, land surface
temperature and NDVI time series. Pixel math is delegated to a
[`backend::Backend`]; [`backend::memory`] is an in-process implementation on
`ndarray` used by the CLI and the tests.

Stability
---------
The public library API is experimental in initial releases and may evolve.

Add dependency
--------------
```toml
[dependencies]
bandwise = "0.1"
```

Resolve a layout and fetch a recipe
-----------------------------------
```rust
use bandwise::{BandSet, ProductKind, RecipeRegistry, SensorVariant, resolve_variant};

fn main() -> bandwise::Result<()> {
    let bands = BandSet::new(["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7", "ST_B6"]);
    let variant = resolve_variant(None, &bands);
    assert_eq!(variant, SensorVariant::Landsat7Sr);

    let registry = RecipeRegistry::default();
    let ndvi = registry.lookup(variant, ProductKind::SpectralIndex, Some("NDVI"))?;
    assert_eq!(ndvi.input_bands(), vec!["SR_B4", "SR_B3"]);
    Ok(())
}
```

Composite, then run a product
-----------------------------
```rust,no_run
use std::path::Path;
use bandwise::{
    CompositeRequest, DateRange, ProductRequest, RecipeRegistry, SelectedImage, SensorProduct,
    Settings, SpectralIndex, build_composite, load_catalog, read_region, run_product,
};

fn main() -> bandwise::Result<()> {
    let backend = load_catalog(Path::new("catalog.json"))?;
    let region = read_region(Path::new("field.geojson"))?;
    let settings = Settings::default();

    let request = CompositeRequest {
        product: SensorProduct::Landsat9Sr,
        region: region.clone(),
        dates: DateRange::parse("2023-06-01", "2023-09-01")?,
        max_cloud_probability: settings.composite.max_cloud_probability,
    };
    let Some(composite) = build_composite(&backend, &request)? else {
        println!("no scenes");
        return Ok(());
    };

    let registry = RecipeRegistry::new(settings.model_root.clone());
    let selected = SelectedImage::from_composite(composite, region);
    let ndvi = run_product(
        &backend,
        &registry,
        &settings,
        &selected,
        &ProductRequest::SpectralIndex { index: SpectralIndex::Ndvi },
    )?;
    println!("{:?}", ndvi.vis);
    Ok(())
}
```

Error handling
--------------
All public functions return `bandwise::Result<T>`. Every `bandwise::Error`
variant is recoverable by user action: an unrecognised band layout, a product
the layout has no recipe for, a missing model asset, an empty result or a
step run out of order.

```rust
use bandwise::{BandSet, Error, ProductKind, RecipeRegistry, resolve_variant};

let bands = BandSet::new(["VV", "VH"]);
let variant = resolve_variant(None, &bands);
match RecipeRegistry::default().lookup(variant, ProductKind::Pca, None) {
    Err(Error::UnsupportedCombination { .. }) => {}
    other => panic!("unexpected {other:?}"),
}
```

Useful modules
--------------
- [`api`] — high-level entry points and [`api::ProductSession`].
- [`core`] — resolver, recipe table, stretch, settings and processing steps.
- [`backend`] — the raster backend traits and the in-memory backend.
- [`io`] — scene catalogs, GeoJSON regions and export writers.
- [`types`] — sensor, product and algorithm enums.
- [`error`] — crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod backend;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Curated public API surface
// Types
pub use core::bands::BandSet;
pub use core::params::{PcaBandPolicy, ProductRequest, Settings};
pub use core::recipes::{Formula, Recipe, RecipeRegistry, StretchRule};
pub use core::resolver::SensorFormatResolver;
pub use core::stretch::{BandPercentiles, StretchCalculator, VisualizationParams, VisualizationRange};
pub use error::{Error, Result};
pub use types::{
    ClusterAlgorithm, FalseColorComposite, ImageSource, ProcessingLevel, ProductKind,
    SensorProduct, SensorVariant, SpectralIndex, SupervisedAlgorithm,
};

// Backend
pub use backend::memory::{MemoryBackend, MemoryImage};
pub use backend::{Backend, DateRange, Geometry, ImageCollection, RasterImage};

// Processing
pub use core::processing::composite::{Composite, CompositeRequest};
pub use core::processing::pipeline::{ProductOutput, SelectedImage};
pub use core::processing::timeseries::{NdviPoint, SeriesRequest, spawn_ndvi_series};

// Readers
pub use io::{load_catalog, read_region, read_scene};

// High-level API re-exports
pub use api::{
    ProductSession, build_composite, compute_stretch, default_export_name, export_request,
    get_recipe, preview_composite, resolve_variant, run_product,
};
