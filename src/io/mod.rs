//! File I/O: JSON scene catalogs for the in-memory backend, GeoJSON regions,
//! and `writers` for exported rasters and their sidecars.
pub mod geojson;
pub mod scene;
pub mod writers;

pub use geojson::{parse_region, read_region};
pub use scene::{Catalog, SceneSpec, load_catalog, read_scene};
