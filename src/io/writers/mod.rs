//! Output writers for exported rasters: multi-page float TIFF, world file and
//! `.prj` georeferencing, and a JSON metadata sidecar.
pub mod metadata;
pub mod tiff;
pub mod worldfile;
