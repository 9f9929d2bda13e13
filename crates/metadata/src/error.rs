//! Error type shared by the SQLite and PostgreSQL stores.

use thiserror::Error;

/// Failures surfaced by store operations.
///
/// `NotFound` doubles as the miss signal for conditional mutations: an
/// UPDATE or DELETE that matched no row reports the missing entity
/// instead of succeeding silently.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint hit, e.g. a duplicate account email or a share
    /// code collision.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
