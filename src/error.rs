//! Crate-level error type and `Result` alias.
//! Every variant is a condition the user can recover from by changing the
//! image, the product, or the order of steps; none of them aborts the process.
use thiserror::Error;

use crate::types::{ProductKind, SensorVariant};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unrecognized sensor format. Bands: {bands}")]
    UnrecognizedSensorFormat { bands: String },

    #[error("No recipe for {kind} on {variant}{}", selector_suffix(.selector))]
    UnsupportedCombination {
        variant: SensorVariant,
        kind: ProductKind,
        selector: Option<String>,
    },

    #[error("Unrecognized image type: {0}")]
    UnrecognizedImageType(String),

    #[error("Classifier model not found: {asset_id}")]
    ModelNotFound { asset_id: String },

    #[error("No data: {0}")]
    EmptyResult(String),

    #[error("{step} must be completed first")]
    MissingPrerequisite { step: &'static str },

    #[error("Band `{band}` not found. Available: {available}")]
    BandNotFound { band: String, available: String },

    #[error("Invalid argument: {arg}={value}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Date parse error: {0}")]
    Date(#[from] chrono::ParseError),
}

fn selector_suffix(selector: &Option<String>) -> String {
    selector
        .as_deref()
        .map(|s| format!(" ({s})"))
        .unwrap_or_default()
}

impl Error {
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Error::Backend(e.to_string())
    }

    pub(crate) fn unsupported(
        variant: SensorVariant,
        kind: ProductKind,
        selector: Option<&str>,
    ) -> Self {
        Error::UnsupportedCombination {
            variant,
            kind,
            selector: selector.map(str::to_string),
        }
    }
}
