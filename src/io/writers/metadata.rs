use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::core::stretch::VisualizationParams;
use crate::error::Result;

/// Contents of the JSON sidecar written next to an exported raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub description: String,
    pub bands: Vec<String>,
    pub width: usize,
    pub height: usize,
    /// Requested export scale in metres.
    pub scale: f64,
    pub crs: String,
    pub geotransform: [f64; 6],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<VisualizationParams>,
    /// Image properties carried through processing (spacecraft, product id, ...).
    pub properties: BTreeMap<String, Value>,
    /// RFC 3339 creation timestamp.
    pub created: String,
}

/// Write `<output>.json` next to the raster.
pub fn write_sidecar(output_path: &Path, metadata: &ExportMetadata) -> Result<PathBuf> {
    let sidecar_path = output_path.with_extension("json");
    let json_string = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&sidecar_path, json_string)?;
    info!("Created metadata sidecar: {:?}", sidecar_path);
    Ok(sidecar_path)
}

pub fn read_sidecar(path: &Path) -> Result<ExportMetadata> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
