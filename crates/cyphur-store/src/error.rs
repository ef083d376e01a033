use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The conversation or message does not exist. Returned, never
    /// panicked: edit/delete races with a concurrent delete are expected.
    #[error("Record not found")]
    NotFound,

    /// Rejected before any state mutation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A persisted blob could not be encoded or decoded.
    #[error("Blob serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The host config store refused the operation.
    #[error("Config store error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
