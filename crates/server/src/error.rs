//! API error types.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Wire envelope for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub code: String,
    /// Sentence for the caller.
    pub message: String,
    /// When a rate-limit window resets, for `rate_limited` errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<String>,
}

/// API error type.
///
/// Messages on the first six variants are returned verbatim to callers,
/// including recipients on the public share surface, so they are written
/// as plain sentences without a technical prefix.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("too many requests")]
    RateLimited { reset_at: OffsetDateTime },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] satchel_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] satchel_metadata::MetadataError),

    #[error("credential error: {0}")]
    Credential(#[from] satchel_credentials::CredentialError),

    #[error("mail error: {0}")]
    Mail(#[from] satchel_mailer::MailerError),
}

impl ApiError {
    /// HTTP status and envelope code, decided together so a variant
    /// cannot drift between the two.
    fn parts(&self) -> (StatusCode, &'static str) {
        use satchel_credentials::CredentialError;
        use satchel_metadata::MetadataError;
        use satchel_storage::StorageError;

        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "storage_error"),
            Self::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            Self::Metadata(MetadataError::NotFound(_)) => (StatusCode::NOT_FOUND, "metadata_error"),
            Self::Metadata(MetadataError::AlreadyExists(_)) => {
                (StatusCode::CONFLICT, "metadata_error")
            }
            Self::Metadata(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
            Self::Credential(CredentialError::InvalidToken(_)) => {
                (StatusCode::UNAUTHORIZED, "credential_error")
            }
            Self::Credential(_) => (StatusCode::INTERNAL_SERVER_ERROR, "credential_error"),
            Self::Mail(_) => (StatusCode::BAD_GATEWAY, "mail_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let reset_at = match &self {
            Self::RateLimited { reset_at } => Some(*reset_at),
            _ => None,
        };
        let body = ErrorResponse {
            code: code.to_string(),
            message: self.to_string(),
            reset_at: reset_at.map(|at| at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(at) = reset_at {
            let secs = (at - OffsetDateTime::now_utc()).whole_seconds().max(0) as u64;
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
