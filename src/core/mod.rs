//! Decision layer: band-layout resolution, the recipe table, display
//! stretch, settings and the processing steps that drive a backend.
//! The high-level `api` module is built on these.
pub mod bands;
pub mod params;
pub mod processing;
pub mod recipes;
pub mod resolver;
pub mod stretch;
