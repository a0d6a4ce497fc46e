use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    ClusterAlgorithm, FalseColorComposite, ProductKind, SpectralIndex, SupervisedAlgorithm,
};

/// Default root under which pre-trained classifier assets are registered.
pub const DEFAULT_MODEL_ROOT: &str = "models";

/// Settings suitable for config files. Every section has defaults, so a
/// partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the classifier asset ids (`{model_root}/{sensor}_{algorithm}`).
    pub model_root: String,
    pub export: ExportDefaults,
    pub composite: CompositeDefaults,
    pub unsupervised: UnsupervisedDefaults,
    pub time_series: TimeSeriesDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_root: DEFAULT_MODEL_ROOT.to_string(),
            export: ExportDefaults::default(),
            composite: CompositeDefaults::default(),
            unsupervised: UnsupervisedDefaults::default(),
            time_series: TimeSeriesDefaults::default(),
        }
    }
}

impl Settings {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.export.scale > 0.0) {
            return Err(Error::InvalidArgument {
                arg: "export.scale",
                value: self.export.scale.to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.composite.max_cloud_probability) {
            return Err(Error::InvalidArgument {
                arg: "composite.max_cloud_probability",
                value: self.composite.max_cloud_probability.to_string(),
            });
        }
        if self.unsupervised.sample_size == 0 {
            return Err(Error::InvalidArgument {
                arg: "unsupervised.sample_size",
                value: "0".to_string(),
            });
        }
        if self.unsupervised.max_clusters < MAX_CLUSTER_CHOICE {
            return Err(Error::InvalidArgument {
                arg: "unsupervised.max_clusters",
                value: self.unsupervised.max_clusters.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    pub folder: String,
    pub scale: f64,
    pub crs: String,
    pub max_pixels: f64,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            folder: "GEE_Exports".to_string(),
            scale: 10.0,
            crs: "EPSG:4326".to_string(),
            max_pixels: 1e13,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeDefaults {
    /// Sentinel-2 pixels are kept when their cloud probability is below this.
    pub max_cloud_probability: f64,
}

impl Default for CompositeDefaults {
    fn default() -> Self {
        Self {
            max_cloud_probability: 20.0,
        }
    }
}

pub const MIN_CLUSTER_CHOICE: usize = 2;
pub const MAX_CLUSTER_CHOICE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsupervisedDefaults {
    pub sample_size: usize,
    pub sample_scale: f64,
    /// Upper bound of the cluster search for cascade k-means and x-means.
    pub max_clusters: usize,
    pub seed: u64,
}

impl Default for UnsupervisedDefaults {
    fn default() -> Self {
        Self {
            sample_size: 5000,
            sample_scale: 30.0,
            max_clusters: 11,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesDefaults {
    pub limit: usize,
    pub max_cloudy_pixel_percentage: f64,
    pub scale: f64,
}

impl Default for TimeSeriesDefaults {
    fn default() -> Self {
        Self {
            limit: 50,
            max_cloudy_pixel_percentage: 20.0,
            scale: 30.0,
        }
    }
}

/// Which bands PCA runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcaBandPolicy {
    /// The four broadband optical bands of the variant's recipe.
    #[default]
    Recipe,
    /// Every band of the image. Must be asked for; never chosen automatically.
    AllBands,
}

/// A product preset, loadable from JSON or built from CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "product", rename_all = "snake_case")]
pub enum ProductRequest {
    FalseColor {
        composite: FalseColorComposite,
    },
    SpectralIndex {
        index: SpectralIndex,
    },
    Pca {
        #[serde(default)]
        policy: PcaBandPolicy,
    },
    Pansharpen,
    UnsupervisedClassify {
        algorithm: ClusterAlgorithm,
        clusters: usize,
    },
    SupervisedClassify {
        algorithm: SupervisedAlgorithm,
    },
    Lst,
}

impl ProductRequest {
    pub fn kind(&self) -> ProductKind {
        match self {
            ProductRequest::FalseColor { .. } => ProductKind::FalseColor,
            ProductRequest::SpectralIndex { .. } => ProductKind::SpectralIndex,
            ProductRequest::Pca { .. } => ProductKind::Pca,
            ProductRequest::Pansharpen => ProductKind::Pansharpen,
            ProductRequest::UnsupervisedClassify { .. } => ProductKind::UnsupervisedClassify,
            ProductRequest::SupervisedClassify { .. } => ProductKind::SupervisedClassify,
            ProductRequest::Lst => ProductKind::Lst,
        }
    }

    /// Registry selector carried by the request, if its kind has one.
    pub fn selector(&self) -> Option<&'static str> {
        match self {
            ProductRequest::FalseColor { composite } => Some(composite.label()),
            ProductRequest::SpectralIndex { index } => Some(index.name()),
            ProductRequest::SupervisedClassify { algorithm } => Some(algorithm.tag()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let ProductRequest::UnsupervisedClassify { clusters, .. } = self {
            if !(MIN_CLUSTER_CHOICE..=MAX_CLUSTER_CHOICE).contains(clusters) {
                return Err(Error::InvalidArgument {
                    arg: "clusters",
                    value: clusters.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let request: ProductRequest = serde_json::from_str(&text)?;
        request.validate()?;
        Ok(request)
    }
}
