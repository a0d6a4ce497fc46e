use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use bandwise::types::{
    ClusterAlgorithm, FalseColorComposite, ImageSource, ProductKind, SensorProduct,
    SensorVariant, SpectralIndex, SupervisedAlgorithm,
};

#[derive(Parser)]
#[command(name = "bandwise", version, about = "bandwise CLI")]
pub struct CliArgs {
    /// Settings JSON file (model root, export and processing defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable logging
    #[arg(long, global = true, default_value_t = false)]
    pub log: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Detect the sensor layout of a band list or a scene file
    Resolve(ResolveArgs),
    /// Print the recipe for a layout and product
    Recipe(RecipeArgs),
    /// Shared display range of three bands from percentile statistics
    Stretch(StretchArgs),
    /// Build a cloud-masked median composite from a scene catalog
    Composite(CompositeArgs),
    /// Run a derived product on a scene
    Run(RunArgs),
    /// Regional mean NDVI per scene over a date range
    NdviSeries(SeriesArgs),
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Comma-separated band names
    #[arg(long, value_delimiter = ',', conflicts_with = "scene")]
    pub bands: Vec<String>,

    /// Scene JSON file to read band names from
    #[arg(long)]
    pub scene: Option<PathBuf>,

    /// Declared image source; `s2` skips band inspection
    #[arg(long, value_enum)]
    pub source: Option<ImageSource>,
}

#[derive(Args)]
pub struct RecipeArgs {
    #[arg(long, value_enum)]
    pub variant: SensorVariant,

    #[arg(long, value_enum)]
    pub kind: ProductKind,

    /// Index name, composite label or supervised algorithm tag
    #[arg(long)]
    pub selector: Option<String>,

    /// Satellite id for supervised recipes (LANDSAT_7, LANDSAT_8, LANDSAT_9)
    #[arg(long)]
    pub satellite: Option<String>,

    /// List the selectors available for the variant and kind instead
    #[arg(long, default_value_t = false)]
    pub list: bool,
}

#[derive(Args)]
pub struct StretchArgs {
    /// JSON object mapping band name to {"p2": .., "p98": ..}
    #[arg(long)]
    pub stats: PathBuf,

    /// Three comma-separated band names, in display order
    #[arg(long, value_delimiter = ',', required = true)]
    pub bands: Vec<String>,
}

/// Collection, region and date filters shared by composite and series runs.
#[derive(Args)]
pub struct SceneFilter {
    /// Scene catalog JSON file
    #[arg(long)]
    pub catalog: PathBuf,

    #[arg(long, value_enum)]
    pub product: SensorProduct,

    /// Region GeoJSON file
    #[arg(long)]
    pub region: PathBuf,

    /// Start date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub start: String,

    /// End date, exclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end: String,
}

#[derive(Args)]
pub struct CompositeArgs {
    #[command(flatten)]
    pub filter: SceneFilter,

    /// Sentinel-2 cloud probability threshold (defaults to the settings value)
    #[arg(long)]
    pub max_cloud_probability: Option<f64>,

    /// Export the composite under this name
    #[arg(long)]
    pub export: Option<String>,

    /// Directory export folders are created in
    #[arg(long, default_value = ".")]
    pub export_root: PathBuf,
}

#[derive(Args)]
pub struct RunArgs {
    /// Scene JSON file holding the image to process
    #[arg(long)]
    pub scene: PathBuf,

    /// Scene catalog JSON file providing classifier models
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Region GeoJSON file; defaults to the scene footprint
    #[arg(long)]
    pub region: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub source: Option<ImageSource>,

    /// Product preset JSON file; overrides the product flags below
    #[arg(long, conflicts_with = "product")]
    pub preset: Option<PathBuf>,

    #[arg(long, value_enum, required_unless_present = "preset")]
    pub product: Option<ProductKind>,

    #[arg(long, value_enum)]
    pub index: Option<SpectralIndex>,

    #[arg(long, value_enum)]
    pub composite: Option<FalseColorComposite>,

    #[arg(long, value_enum, default_value_t = ClusterAlgorithm::KMeans)]
    pub cluster_algorithm: ClusterAlgorithm,

    /// Cluster count for unsupervised classification (2-10)
    #[arg(long, default_value_t = 5)]
    pub clusters: usize,

    #[arg(long, value_enum, default_value_t = SupervisedAlgorithm::RandomForest)]
    pub supervised_algorithm: SupervisedAlgorithm,

    /// Run PCA over every band of the scene instead of the recipe bands
    #[arg(long, default_value_t = false)]
    pub all_bands: bool,

    /// Export the product under this name
    #[arg(long)]
    pub export: Option<String>,

    /// Directory export folders are created in
    #[arg(long, default_value = ".")]
    pub export_root: PathBuf,
}

#[derive(Args)]
pub struct SeriesArgs {
    #[command(flatten)]
    pub filter: SceneFilter,

    /// Write the series as JSON here instead of printing it
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
