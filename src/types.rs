//! Shared enums used across the crate.
//! Includes `SensorVariant`, `ProductKind`, `ImageSource`, `SensorProduct`,
//! the per-product selectors (`SpectralIndex`, `FalseColorComposite`) and the
//! classifier choices (`ClusterAlgorithm`, `SupervisedAlgorithm`).
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Band layout of an image: a sensor plus a processing level.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum SensorVariant {
    #[value(name = "s2")]
    Sentinel2,
    #[value(name = "l7-sr")]
    Landsat7Sr,
    #[value(name = "l7-toa")]
    Landsat7Toa,
    #[value(name = "l8-9-sr")]
    Landsat89Sr,
    #[value(name = "l8-9-toa")]
    Landsat89Toa,
    Unknown,
}

impl SensorVariant {
    pub fn is_landsat(self) -> bool {
        matches!(
            self,
            SensorVariant::Landsat7Sr
                | SensorVariant::Landsat7Toa
                | SensorVariant::Landsat89Sr
                | SensorVariant::Landsat89Toa
        )
    }

    pub fn processing_level(self) -> Option<ProcessingLevel> {
        match self {
            SensorVariant::Landsat7Sr | SensorVariant::Landsat89Sr => {
                Some(ProcessingLevel::SurfaceReflectance)
            }
            SensorVariant::Landsat7Toa | SensorVariant::Landsat89Toa => Some(ProcessingLevel::Toa),
            SensorVariant::Sentinel2 => Some(ProcessingLevel::SurfaceReflectance),
            SensorVariant::Unknown => None,
        }
    }

    /// Processing scale in metres; `None` for `Unknown`.
    pub fn scale(self) -> Option<f64> {
        match self {
            SensorVariant::Sentinel2 => Some(10.0),
            SensorVariant::Unknown => None,
            _ => Some(30.0),
        }
    }
}

impl std::fmt::Display for SensorVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SensorVariant::Sentinel2 => "Sentinel-2",
            SensorVariant::Landsat7Sr => "Landsat 7 Surface Reflectance",
            SensorVariant::Landsat7Toa => "Landsat 7 TOA",
            SensorVariant::Landsat89Sr => "Landsat 8/9 Surface Reflectance",
            SensorVariant::Landsat89Toa => "Landsat 8/9 TOA",
            SensorVariant::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ProductKind {
    FalseColor,
    SpectralIndex,
    Pca,
    Pansharpen,
    UnsupervisedClassify,
    SupervisedClassify,
    Lst,
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKind::FalseColor => write!(f, "False Color Composite"),
            ProductKind::SpectralIndex => write!(f, "Spectral Index"),
            ProductKind::Pca => write!(f, "PCA"),
            ProductKind::Pansharpen => write!(f, "Pansharpening"),
            ProductKind::UnsupervisedClassify => write!(f, "Unsupervised Classification"),
            ProductKind::SupervisedClassify => write!(f, "Supervised Classification"),
            ProductKind::Lst => write!(f, "Land Surface Temperature"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ProcessingLevel {
    #[value(name = "sr")]
    SurfaceReflectance,
    Toa,
}

/// Which processed image the caller picked. `Sentinel2` is an explicit hint
/// that bypasses band inspection.
#[derive(Copy, Clone, PartialEq, Eq, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ImageSource {
    #[value(name = "s2")]
    Sentinel2,
    Landsat,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Sentinel2 => write!(f, "Sentinel-2"),
            ImageSource::Landsat => write!(f, "Landsat"),
        }
    }
}

/// A selectable image collection.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum SensorProduct {
    #[value(name = "s2")]
    Sentinel2,
    #[value(name = "l9-sr")]
    Landsat9Sr,
    #[value(name = "l9-toa")]
    Landsat9Toa,
    #[value(name = "l8-sr")]
    Landsat8Sr,
    #[value(name = "l8-toa")]
    Landsat8Toa,
    #[value(name = "l7-sr")]
    Landsat7Sr,
    #[value(name = "l7-toa")]
    Landsat7Toa,
}

impl SensorProduct {
    pub const ALL: [SensorProduct; 7] = [
        SensorProduct::Sentinel2,
        SensorProduct::Landsat9Sr,
        SensorProduct::Landsat9Toa,
        SensorProduct::Landsat8Sr,
        SensorProduct::Landsat8Toa,
        SensorProduct::Landsat7Sr,
        SensorProduct::Landsat7Toa,
    ];

    pub fn collection_id(self) -> &'static str {
        match self {
            SensorProduct::Sentinel2 => "COPERNICUS/S2_SR_HARMONIZED",
            SensorProduct::Landsat9Sr => "LANDSAT/LC09/C02/T1_L2",
            SensorProduct::Landsat9Toa => "LANDSAT/LC09/C02/T1_TOA",
            SensorProduct::Landsat8Sr => "LANDSAT/LC08/C02/T1_L2",
            SensorProduct::Landsat8Toa => "LANDSAT/LC08/C02/T1_TOA",
            SensorProduct::Landsat7Sr => "LANDSAT/LE07/C02/T1_L2",
            SensorProduct::Landsat7Toa => "LANDSAT/LE07/C02/T1_TOA",
        }
    }

    /// Co-registered cloud probability collection (Sentinel-2 only).
    pub fn cloud_probability_collection(self) -> Option<&'static str> {
        match self {
            SensorProduct::Sentinel2 => Some("COPERNICUS/S2_CLOUD_PROBABILITY"),
            _ => None,
        }
    }

    pub fn source(self) -> ImageSource {
        match self {
            SensorProduct::Sentinel2 => ImageSource::Sentinel2,
            _ => ImageSource::Landsat,
        }
    }

    pub fn processing_level(self) -> ProcessingLevel {
        match self {
            SensorProduct::Sentinel2
            | SensorProduct::Landsat9Sr
            | SensorProduct::Landsat8Sr
            | SensorProduct::Landsat7Sr => ProcessingLevel::SurfaceReflectance,
            _ => ProcessingLevel::Toa,
        }
    }

    /// Band layout a composite of this product is expected to resolve to.
    pub fn expected_variant(self) -> SensorVariant {
        match self {
            SensorProduct::Sentinel2 => SensorVariant::Sentinel2,
            SensorProduct::Landsat9Sr | SensorProduct::Landsat8Sr => SensorVariant::Landsat89Sr,
            SensorProduct::Landsat9Toa | SensorProduct::Landsat8Toa => SensorVariant::Landsat89Toa,
            SensorProduct::Landsat7Sr => SensorVariant::Landsat7Sr,
            SensorProduct::Landsat7Toa => SensorVariant::Landsat7Toa,
        }
    }

    /// Scene property the time series sorts by, least cloudy first.
    pub fn cloud_cover_property(self) -> &'static str {
        match self {
            SensorProduct::Sentinel2 => "CLOUDY_PIXEL_PERCENTAGE",
            _ => "CLOUD_COVER",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorProduct::Sentinel2 => "Sentinel-2",
            SensorProduct::Landsat9Sr => "L9 Surface Reflectance",
            SensorProduct::Landsat9Toa => "L9 TOA Reflectance",
            SensorProduct::Landsat8Sr => "L8 Surface Reflectance",
            SensorProduct::Landsat8Toa => "L8 TOA Reflectance",
            SensorProduct::Landsat7Sr => "L7 Surface Reflectance",
            SensorProduct::Landsat7Toa => "L7 TOA Reflectance",
        }
    }
}

impl std::fmt::Display for SensorProduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for SensorProduct {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorProduct::ALL
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidArgument {
                arg: "sensor product",
                value: s.to_string(),
            })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum SpectralIndex {
    Ndvi,
    Ndwi,
    Ndbi,
    Rvi,
    Grvi,
    Gndvi,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 6] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Ndwi,
        SpectralIndex::Ndbi,
        SpectralIndex::Rvi,
        SpectralIndex::Grvi,
        SpectralIndex::Gndvi,
    ];

    /// Name used for the output band and as the registry selector.
    pub fn name(self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndwi => "NDWI",
            SpectralIndex::Ndbi => "NDBI",
            SpectralIndex::Rvi => "RVI",
            SpectralIndex::Grvi => "GRVI",
            SpectralIndex::Gndvi => "GNDVI",
        }
    }

    pub fn palette(self) -> [&'static str; 3] {
        match self {
            SpectralIndex::Ndvi => ["blue", "white", "green"],
            SpectralIndex::Ndwi => ["brown", "white", "blue"],
            SpectralIndex::Ndbi => ["blue", "white", "red"],
            SpectralIndex::Rvi => ["purple", "white", "yellow"],
            SpectralIndex::Grvi => ["black", "white", "green"],
            SpectralIndex::Gndvi => ["cyan", "white", "darkgreen"],
        }
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SpectralIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpectralIndex::ALL
            .into_iter()
            .find(|i| i.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidArgument {
                arg: "spectral index",
                value: s.to_string(),
            })
    }
}

/// Named band triples. Not every composite exists for every variant.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum FalseColorComposite {
    Agriculture,
    Geology,
    Bathymetric,
    FalseColorInfrared,
    FalseColorUrban,
    ColorInfraredVegetation,
    AtmosphericPenetration,
    HealthyVegetation,
    LandWater,
    NaturalWithAtmosphericRemoval,
    ShortwaveInfrared,
    VegetationAnalysis,
}

impl FalseColorComposite {
    pub const ALL: [FalseColorComposite; 12] = [
        FalseColorComposite::Agriculture,
        FalseColorComposite::Geology,
        FalseColorComposite::Bathymetric,
        FalseColorComposite::FalseColorInfrared,
        FalseColorComposite::FalseColorUrban,
        FalseColorComposite::ColorInfraredVegetation,
        FalseColorComposite::AtmosphericPenetration,
        FalseColorComposite::HealthyVegetation,
        FalseColorComposite::LandWater,
        FalseColorComposite::NaturalWithAtmosphericRemoval,
        FalseColorComposite::ShortwaveInfrared,
        FalseColorComposite::VegetationAnalysis,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FalseColorComposite::Agriculture => "Agriculture",
            FalseColorComposite::Geology => "Geology",
            FalseColorComposite::Bathymetric => "Bathymetric",
            FalseColorComposite::FalseColorInfrared => "False Color Infrared",
            FalseColorComposite::FalseColorUrban => "False Color (Urban)",
            FalseColorComposite::ColorInfraredVegetation => "Color Infrared (Vegetation)",
            FalseColorComposite::AtmosphericPenetration => "Atmospheric Penetration",
            FalseColorComposite::HealthyVegetation => "Healthy Vegetation",
            FalseColorComposite::LandWater => "Land/Water",
            FalseColorComposite::NaturalWithAtmosphericRemoval => {
                "Natural With Atmospheric Removal"
            }
            FalseColorComposite::ShortwaveInfrared => "Shortwave Infrared",
            FalseColorComposite::VegetationAnalysis => "Vegetation Analysis",
        }
    }
}

impl std::fmt::Display for FalseColorComposite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for FalseColorComposite {
    type Err = Error;

    /// Accepts the display label, the CLI value name, or the Sentinel-2
    /// spellings "False Color Urban" and "Natural Colors with Atmospheric Removal".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(found) = FalseColorComposite::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s))
        {
            return Ok(found);
        }
        if s.eq_ignore_ascii_case("False Color Urban") {
            return Ok(FalseColorComposite::FalseColorUrban);
        }
        if s.eq_ignore_ascii_case("Natural Colors with Atmospheric Removal") {
            return Ok(FalseColorComposite::NaturalWithAtmosphericRemoval);
        }
        <FalseColorComposite as ValueEnum>::from_str(s, true).map_err(|_| Error::InvalidArgument {
            arg: "false color composite",
            value: s.to_string(),
        })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ClusterAlgorithm {
    KMeans,
    CascadeKMeans,
    XMeans,
}

impl std::fmt::Display for ClusterAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterAlgorithm::KMeans => write!(f, "K-Means"),
            ClusterAlgorithm::CascadeKMeans => write!(f, "Cascade K-Means"),
            ClusterAlgorithm::XMeans => write!(f, "X-Means"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum SupervisedAlgorithm {
    RandomForest,
    ExtraTrees,
}

impl SupervisedAlgorithm {
    /// Suffix of the model asset name.
    pub fn tag(self) -> &'static str {
        match self {
            SupervisedAlgorithm::RandomForest => "random_forest",
            SupervisedAlgorithm::ExtraTrees => "extratrees",
        }
    }
}

impl std::fmt::Display for SupervisedAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisedAlgorithm::RandomForest => write!(f, "Random Forest"),
            SupervisedAlgorithm::ExtraTrees => write!(f, "Extra Trees"),
        }
    }
}

impl FromStr for SupervisedAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random_forest" | "random forest" | "random-forest" => {
                Ok(SupervisedAlgorithm::RandomForest)
            }
            "extratrees" | "extra trees" | "extra-trees" => Ok(SupervisedAlgorithm::ExtraTrees),
            _ => Err(Error::InvalidArgument {
                arg: "supervised algorithm",
                value: s.to_string(),
            }),
        }
    }
}
