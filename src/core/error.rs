//! Error types for kernel evaluation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RankCvError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Dataset mismatch: {0}")]
    DataMismatch(String),

    #[error("Invalid labels: {0}")]
    InvalidLabels(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RankCvError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Shorthand for a dataset mismatch error
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::DataMismatch(message.into())
    }
}

pub type Result<T> = std::result::Result<T, RankCvError>;
