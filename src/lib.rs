pub mod error;
pub mod settings;
pub mod manifest;
pub mod preprocessing;
pub mod feature_extractor;
pub mod pipeline;
pub mod label_key;
pub mod lbfgs;
pub mod classifier;
pub mod metrics;
pub mod report;
