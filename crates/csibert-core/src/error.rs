//! Error types for the CSI-BERT data and model layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Degenerate input: zero variance over {n_elements} elements")]
    DegenerateInput { n_elements: usize },

    #[error("Sequence length {length} exceeds capacity of {max} positions")]
    Capacity { length: usize, max: usize },

    #[error("Batch shape mismatch: {inputs} inputs, {labels} labels")]
    ShapeMismatch { inputs: usize, labels: usize },

    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    FeatureDim { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
