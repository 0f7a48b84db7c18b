use thiserror::Error;

/// Errors produced by type operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("null node id is not a valid identity")]
    NullId,

    #[error("wrapped value type mismatch: expected {expected}, found {actual}")]
    WrappedTypeMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
