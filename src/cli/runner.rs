use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bandwise::api::{self, export_request};
use bandwise::backend::{Backend, Geometry, RasterImage};
use bandwise::core::processing::timeseries::{SeriesRequest, spawn_ndvi_series};
use bandwise::types::ProductKind;
use bandwise::{
    BandPercentiles, BandSet, CompositeRequest, DateRange, MemoryBackend, PcaBandPolicy,
    ProductRequest, RecipeRegistry, SelectedImage, Settings, load_catalog, read_region,
    read_scene,
};

use super::args::{
    CliArgs, Command, CompositeArgs, RecipeArgs, ResolveArgs, RunArgs, SceneFilter, SeriesArgs,
    StretchArgs,
};
use super::errors::AppError;

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn print_json(value: &serde_json::Value) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve(args: ResolveArgs) -> CliResult {
    let bands = match &args.scene {
        Some(path) => read_scene(path)?.band_set(),
        None if !args.bands.is_empty() => BandSet::new(args.bands.iter().map(|b| b.trim())),
        None => {
            return Err(AppError::MissingArgument {
                arg: "--bands or --scene".to_string(),
            }
            .into());
        }
    };
    let variant = api::resolve_variant(args.source, &bands);
    info!("{} -> {}", bands, variant);
    print_json(&json!({
        "bands": bands.names(),
        "variant": variant,
        "label": variant.to_string(),
    }))
}

fn recipe(args: RecipeArgs, settings: &Settings) -> CliResult {
    let registry = RecipeRegistry::new(settings.model_root.clone());
    if args.list {
        let selectors = registry.selectors(args.variant, args.kind);
        return print_json(&json!(selectors));
    }
    let recipe = api::get_recipe(
        &registry,
        args.variant,
        args.kind,
        args.selector.as_deref(),
        args.satellite.as_deref(),
    )?;
    print_json(&serde_json::to_value(&recipe)?)
}

fn stretch(args: StretchArgs) -> CliResult {
    let [a, b, c] = <[String; 3]>::try_from(args.bands.clone()).map_err(|_| AppError::BandTriple {
        count: args.bands.len(),
    })?;
    let text = fs::read_to_string(&args.stats)?;
    let stats: BTreeMap<String, BandPercentiles> = serde_json::from_str(&text)?;
    let range = api::compute_stretch(&stats, &[a, b, c]);
    if range.is_flat() {
        warn!("Flat display range; the render will have no contrast");
    }
    print_json(&serde_json::to_value(&range)?)
}

type SceneInputs = (MemoryBackend, Geometry, DateRange);

fn scene_inputs(
    filter: &SceneFilter,
    export_root: &Path,
) -> Result<SceneInputs, Box<dyn std::error::Error>> {
    let backend = load_catalog(&filter.catalog)?.with_export_root(export_root);
    let region = read_region(&filter.region)?;
    let dates = DateRange::parse(&filter.start, &filter.end)?;
    Ok((backend, region, dates))
}

fn composite(args: CompositeArgs, settings: &Settings) -> CliResult {
    let (backend, region, dates) = scene_inputs(&args.filter, &args.export_root)?;
    let request = CompositeRequest {
        product: args.filter.product,
        region: region.clone(),
        dates,
        max_cloud_probability: args
            .max_cloud_probability
            .unwrap_or(settings.composite.max_cloud_probability),
    };
    let Some(composite) = api::build_composite(&backend, &request)? else {
        info!(
            "No {} scenes between {} and {}",
            args.filter.product, args.filter.start, args.filter.end
        );
        return print_json(&json!({
            "product": args.filter.product.label(),
            "scenes": 0,
            "image": null,
        }));
    };

    let registry = RecipeRegistry::new(settings.model_root.clone());
    let preview = api::preview_composite::<MemoryBackend>(&registry, &composite, &region)?;
    let variant = api::resolve_variant(Some(composite.source()), &composite.bands());
    print_json(&json!({
        "product": composite.product.label(),
        "variant": variant,
        "scenes": composite.scene_count,
        "bands": composite.bands().names(),
        "metadata": composite.metadata,
        "preview": preview,
    }))?;

    if let Some(name) = args.export {
        let request = export_request(settings, &name, Some(region), Some(preview));
        let files = backend.export(&composite.image, &request)?.wait()?;
        info!("Exported {} file(s)", files.len());
        for file in files {
            println!("{}", file.display());
        }
    }
    Ok(())
}

fn product_request(args: &RunArgs) -> Result<ProductRequest, Box<dyn std::error::Error>> {
    if let Some(path) = &args.preset {
        return Ok(ProductRequest::from_json_file(path)?);
    }
    let kind = args.product.ok_or(AppError::MissingArgument {
        arg: "--product".to_string(),
    })?;
    let missing = |arg: &str| AppError::MissingArgument {
        arg: arg.to_string(),
    };
    let request = match kind {
        ProductKind::FalseColor => ProductRequest::FalseColor {
            composite: args.composite.ok_or_else(|| missing("--composite"))?,
        },
        ProductKind::SpectralIndex => ProductRequest::SpectralIndex {
            index: args.index.ok_or_else(|| missing("--index"))?,
        },
        ProductKind::Pca => ProductRequest::Pca {
            policy: if args.all_bands {
                PcaBandPolicy::AllBands
            } else {
                PcaBandPolicy::Recipe
            },
        },
        ProductKind::Pansharpen => ProductRequest::Pansharpen,
        ProductKind::UnsupervisedClassify => ProductRequest::UnsupervisedClassify {
            algorithm: args.cluster_algorithm,
            clusters: args.clusters,
        },
        ProductKind::SupervisedClassify => ProductRequest::SupervisedClassify {
            algorithm: args.supervised_algorithm,
        },
        ProductKind::Lst => ProductRequest::Lst,
    };
    request.validate()?;
    Ok(request)
}

fn run_product(args: RunArgs, settings: &Settings) -> CliResult {
    let request = product_request(&args)?;
    let backend = match &args.catalog {
        Some(path) => load_catalog(path)?,
        None => MemoryBackend::new(),
    }
    .with_export_root(&args.export_root);

    let mut selected = SelectedImage::new(read_scene(&args.scene)?);
    if let Some(source) = args.source {
        selected = selected.with_source(source);
    }
    if let Some(path) = &args.region {
        selected = selected.with_region(read_region(path)?);
    }

    let mut session = api::ProductSession::<MemoryBackend>::new(settings.clone());
    let variant = session.select_image(selected);
    info!("Scene resolves to {}", variant);
    let output = session.compute(&backend, &request)?;
    print_json(&json!({
        "kind": output.kind,
        "variant": output.variant,
        "bands": output.image.band_names(),
        "recipe": output.recipe,
        "vis": output.vis,
        "summary": output.summary,
    }))?;

    if let Some(name) = args.export.as_deref() {
        let files = session.export(&backend, Some(name))?.wait()?;
        info!("Exported {} file(s)", files.len());
        for file in files {
            println!("{}", file.display());
        }
    }
    Ok(())
}

fn ndvi_series(args: SeriesArgs, settings: &Settings) -> CliResult {
    let (backend, region, dates) = scene_inputs(&args.filter, Path::new("."))?;
    let request = SeriesRequest {
        product: args.filter.product,
        region,
        dates,
    };
    let task = spawn_ndvi_series(
        backend,
        RecipeRegistry::new(settings.model_root.clone()),
        request,
        settings.time_series.clone(),
    );
    let points = task.wait()?;
    info!("NDVI series: {} point(s)", points.len());

    let value = serde_json::to_value(&points)?;
    match &args.output {
        Some(path) => {
            fs::write(path, serde_json::to_string_pretty(&value)?)?;
            info!("Wrote {:?}", path);
            Ok(())
        }
        None => print_json(&value),
    }
}

pub fn run(args: CliArgs) -> CliResult {
    let default_level = if args.log { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &args.config {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };

    match args.command {
        Command::Resolve(a) => resolve(a),
        Command::Recipe(a) => recipe(a, &settings),
        Command::Stretch(a) => stretch(a),
        Command::Composite(a) => composite(a, &settings),
        Command::Run(a) => run_product(a, &settings),
        Command::NdviSeries(a) => ndvi_series(a, &settings),
    }
}
