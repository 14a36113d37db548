//! Tokenizer errors.

use thiserror::Error;

/// Errors raised by codecs, codebook policies and backends.
///
/// All of them describe a caller or configuration mistake; none is transient.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A digit outside `{0, 1, 2}` was handed to the radix codec.
    #[error("invalid ternary digit {digit} at position {position}")]
    InvalidDigit { digit: i64, position: usize },

    /// A code does not fit in `[0, cardinality)`.
    #[error("code {code} out of range for cardinality {cardinality}")]
    OutOfRange { code: i64, cardinality: u64 },

    /// The encoder network produced NaN or infinite latent values.
    #[error("non-finite latent: {0}")]
    NonFiniteLatent(String),

    /// Requested codebook count is not allowed.
    #[error("invalid number of codebooks {requested}, allowed values: {allowed}")]
    InvalidCodebookCount { requested: usize, allowed: String },

    /// A scale was given to a backend that never produces one, or was missing.
    #[error("inconsistent scale: {0}")]
    InconsistentScale(String),

    /// Tensor shape does not match what the backend expects.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Channel count not supported by the backend.
    #[error("unsupported channel count: expected {expected}, got {actual}")]
    UnsupportedChannelCount { expected: usize, actual: usize },

    /// Operation not provided by this backend.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Backend configuration rejected at construction.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Factory could not resolve the model name.
    #[error("unknown compression model: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
