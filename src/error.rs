//! Error types for sagebatch.

use thiserror::Error;

/// Sagebatch error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error (device transfer failures surface here unmodified).
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Shape mismatch between splits or within a split.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// A split's target-index set is empty.
    #[error("empty target index set for {split} split")]
    EmptyTargets { split: &'static str },

    /// A node index fell outside its valid range.
    #[error("node index {index} out of range for {num_nodes} nodes")]
    IndexOutOfRange { index: u32, num_nodes: usize },

    /// Auxiliary embeddings requested before the precompute pass ran.
    #[error("auxiliary embeddings not precomputed")]
    AuxMissing,

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Worker pool construction failed.
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
