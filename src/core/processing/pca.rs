//! Principal component transform orchestrated over the backend:
//! centre, covariance, eigen decomposition, projection, unit-variance scaling.
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::backend::{Backend, Geometry, RasterImage, Reducer};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PcaOutput<I> {
    /// Bands `pc1..pcN`, in descending eigenvalue order.
    pub image: I,
    pub eigenvalues: Vec<f64>,
    /// Input bands, in the order the eigenvectors index them.
    pub input_bands: Vec<String>,
}

pub fn component_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("pc{i}")).collect()
}

pub fn principal_components<B: Backend>(
    backend: &B,
    image: &B::Image,
    bands: &[String],
    region: &Geometry,
    scale: f64,
) -> Result<PcaOutput<B::Image>> {
    let names: Vec<&str> = bands.iter().map(String::as_str).collect();
    let selected = image.select(&names)?;

    let means = selected
        .reduce_region(&Reducer::Mean, region, scale, true)?
        .into_values()?;
    if let Some(missing) = bands.iter().find(|b| !means.contains_key(*b)) {
        return Err(Error::EmptyResult(format!(
            "no valid pixels for band {missing} in the region"
        )));
    }
    let centered = selected.subtract_per_band(&means)?;

    let covariance = centered
        .reduce_region(&Reducer::CenteredCovariance, region, scale, true)?
        .into_matrix()?;
    let eigen = backend.eigen(&covariance)?;
    debug!("PCA eigenvalues {:?}", eigen.values);

    let pcs = component_names(bands.len());
    let projected = centered.project(&eigen.vectors, &pcs)?;

    let mut sd = BTreeMap::new();
    for (name, &value) in pcs.iter().zip(&eigen.values) {
        if value <= 0.0 {
            warn!("{} has non-positive variance {}; it is left at zero", name, value);
        }
        sd.insert(name.clone(), value.max(0.0).sqrt());
    }
    let scaled = projected.divide_per_band(&sd)?;

    info!("PCA on {:?}: {} components", bands, pcs.len());
    Ok(PcaOutput {
        image: scaled,
        eigenvalues: eigen.values,
        input_bands: bands.to_vec(),
    })
}
