//! Error types for masked-token training and iterative decoding.

use thiserror::Error;

/// Result type alias for wrapper operations.
pub type Result<T> = std::result::Result<T, NarError>;

/// Errors raised by the non-autoregressive wrapper.
#[derive(Error, Debug)]
pub enum NarError {
    /// Unknown schedule name, or a custom schedule that misbehaves at construction.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Out-of-range wrapper option.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Training input does not match the model's fixed sequence length.
    #[error("sequence length mismatch: model expects {expected}, got {actual}")]
    SequenceLengthMismatch { expected: usize, actual: usize },

    /// The sequence model did not return a requested output.
    #[error("model output missing: {0}")]
    MissingOutput(&'static str),

    /// Tensor runtime error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
