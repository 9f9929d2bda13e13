//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::extract::{ConnectInfo, Request};
use axum::http::header::USER_AGENT;
use satchel_core::AccessEventKind;
use satchel_metadata::models::AccessEventRow;
use satchel_metadata::MetadataStore;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum size for JSON request bodies.
pub const MAX_JSON_BODY_SIZE: usize = 1024 * 1024; // 1MB

/// Read and deserialize a JSON request body.
pub async fn parse_json_body<T: serde::de::DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::Validation(format!("failed to read request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))
}

/// Parse a path segment as a UUID.
pub fn parse_uuid(value: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| ApiError::Validation(format!("invalid {what} ID: {e}")))
}

/// Format a timestamp as RFC 3339 for response bodies.
pub fn rfc3339(at: OffsetDateTime) -> ApiResult<String> {
    at.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

/// Client address for the access ledger and the OTP rate-limit windows.
///
/// Only the direct connection address is used; forwarded headers are client
/// controlled and would let a caller rotate out of their limiter bucket.
/// "unknown" keeps the windows working when ConnectInfo is absent (tests,
/// unusual server setups).
pub fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Client User-Agent header, if present and valid UTF-8.
pub fn user_agent(req: &Request) -> Option<String> {
    req.headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Append one entry to the share access ledger.
///
/// Ledger failures are logged and swallowed: an audit write must never take
/// down the operation it describes. Callers that need the entry for
/// rate-limit accounting accept the small undercount.
pub async fn log_access(
    metadata: &Arc<dyn MetadataStore>,
    share_id: Option<Uuid>,
    kind: AccessEventKind,
    email_input: Option<&str>,
    ip: &str,
    user_agent: Option<&str>,
) {
    let row = AccessEventRow {
        event_id: Uuid::new_v4(),
        share_id,
        event: kind.as_str().to_string(),
        email_input: email_input.map(|e| e.to_string()),
        ip_address: Some(ip.to_string()),
        user_agent: user_agent.map(|ua| ua.to_string()),
        created_at: OffsetDateTime::now_utc(),
    };

    if let Err(e) = metadata.record_event(&row).await {
        tracing::warn!(
            event = kind.as_str(),
            share_id = ?share_id,
            error = %e,
            "failed to record access event"
        );
    }
}

/// Query parameters for paginated listings.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    /// Resolve to a concrete (page, limit), clamping limit to 1..=100.
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (page, limit)
    }
}

/// Pagination metadata returned alongside listed data.
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(total: u64, page: u32, limit: u32) -> Self {
        let total_pages = total.div_ceil(limit as u64);
        Self {
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Envelope for paginated responses: `{data, pagination}`.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}
