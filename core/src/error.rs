//! Error types for the dcnn-core library.
//!
//! Every fallible function returns `DcnnResult<T>`. Configuration and shape
//! errors surface while the model is being assembled, before any batch flows.

/// All error conditions in the dcnn-core library.
#[derive(thiserror::Error, Debug)]
pub enum DcnnError {
    /// A pooling stage asks for more positions than the schedule provides.
    #[error("stage {stage}: pooling k={k} exceeds available sequence length {available}")]
    PoolingExceedsLength {
        stage: usize,
        k: usize,
        available: usize,
    },

    /// Malformed model configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel or feature width disagreement between adjacent layers.
    #[error("shape mismatch: expected {expected} channels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Buffer or array length disagreement.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A batch whose sequence length differs from the one the model was built for.
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidInputLength { expected: usize, actual: usize },

    /// Token id outside the embedding table.
    #[error("token {token} out of range for vocabulary of {vocab_size}")]
    TokenOutOfRange { token: usize, vocab_size: usize },

    /// Batch with no examples.
    #[error("empty batch")]
    EmptyBatch,

    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DcnnResult<T> = Result<T, DcnnError>;
