//! Storage error types.

use thiserror::Error;

use authgraph_domain::EngineError;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Model version not found.
    #[error("model not found: {version}")]
    ModelNotFound { version: String },

    /// A tuple failed write-time validation.
    #[error("invalid tuple: {message}")]
    InvalidTuple { message: String },

    /// Backend connection failure.
    #[error("connection error: {message}")]
    ConnectionError { message: String },

    /// Backend query failure.
    #[error("query error: {message}")]
    QueryError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ModelNotFound { version } => {
                EngineError::UnknownModelVersion { version }
            }
            other => EngineError::StoreUnavailable {
                message: other.to_string(),
            },
        }
    }
}
