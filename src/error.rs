use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Malformed manifest line {line} in {path:?}: {reason}")]
    Parse {
        path: PathBuf,
        line: u64,
        reason: String,
    },
    #[error("Unable to load image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Unable to load model {path:?}: {reason}")]
    ModelLoad {
        path: PathBuf,
        reason: String,
    },
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Error scoring the network: {0}")]
    Inference(String),
    #[error("The classifier must be fitted before it can predict.")]
    NotTrained,
    #[error("The classifier has already been fitted.")]
    AlreadyTrained,
    #[error("Unable to train the classifier: {0}")]
    Training(String),
    #[error("Unable to evaluate predictions: {0}")]
    Metric(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}
