//! Error type for blob storage backends.

use thiserror::Error;

/// Failures surfaced by blob store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob under the requested key.
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key rejected before touching the backend: empty, absolute, or a
    /// traversal attempt.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
