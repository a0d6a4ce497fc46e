use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tiff::encoder::{TiffEncoder, colortype};
use tracing::debug;

use crate::error::{Error, Result};

/// Write each band as one `Gray32Float` page of a multi-page TIFF.
pub fn write_tiff_f32(output: &Path, cols: usize, rows: usize, bands: &[Vec<f32>]) -> Result<()> {
    if bands.is_empty() {
        return Err(Error::InvalidArgument {
            arg: "bands",
            value: "nothing to write".to_string(),
        });
    }
    if let Some(bad) = bands.iter().find(|b| b.len() != cols * rows) {
        return Err(Error::InvalidArgument {
            arg: "bands",
            value: format!("{} samples for a {}x{} raster", bad.len(), cols, rows),
        });
    }

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(output)?))?;
    for band in bands {
        encoder.write_image::<colortype::Gray32Float>(cols as u32, rows as u32, band)?;
    }
    debug!("Wrote {} page(s) {}x{} to {:?}", bands.len(), cols, rows, output);
    Ok(())
}
