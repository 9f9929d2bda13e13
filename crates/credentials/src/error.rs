//! Credential error types.

use thiserror::Error;

/// Credential operation errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("hashing error: {0}")]
    Hashing(String),

    #[error("token creation error: {0}")]
    TokenCreation(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;
