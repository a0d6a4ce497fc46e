pub mod composite;
pub mod pca;
pub mod pipeline;
pub mod timeseries;
