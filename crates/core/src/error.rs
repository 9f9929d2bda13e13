//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid event kind: {0}")]
    InvalidEventKind(String),

    #[error("invalid media kind: {0}")]
    InvalidMediaKind(String),

    #[error("invalid share code: {0}")]
    InvalidShareCode(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
