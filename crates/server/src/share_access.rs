//! Share-access token gate for the post-verification download routes.
//!
//! A share-access token is a capability minted after a successful OTP
//! challenge. The token alone is never sufficient: every gated request
//! re-resolves the bundle and re-checks that it is still active, so revoking
//! or expiring a bundle cuts off holders of live tokens immediately.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use satchel_metadata::models::ShareLinkRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Reject a revoked bundle.
pub(crate) fn revoked_error() -> ApiError {
    ApiError::Validation("this share link has been revoked".to_string())
}

/// Reject an expired bundle.
pub(crate) fn expired_error() -> ApiError {
    ApiError::Validation("this share link has expired".to_string())
}

/// Active-or-throw: revoked wins over expired when both apply.
pub(crate) fn ensure_active(share: &ShareLinkRow, now: OffsetDateTime) -> ApiResult<()> {
    if share.is_revoked() {
        return Err(revoked_error());
    }
    if share.is_expired(now) {
        return Err(expired_error());
    }
    Ok(())
}

/// Authorize a gated share request and return the live bundle.
///
/// The token is taken from the Authorization header or, for plain link
/// downloads, the `token` query parameter. Checks, in order: token validity
/// and kind, token code against the path code, bundle existence under the
/// token's subject, stored code against the token code, and finally that the
/// bundle is still active.
pub async fn authorize_share_access(
    state: &AppState,
    bearer_token: Option<&str>,
    path_code: &str,
    query_token: Option<&str>,
) -> ApiResult<ShareLinkRow> {
    let token = bearer_token
        .or(query_token)
        .ok_or_else(|| ApiError::Unauthorized("access token required".to_string()))?;

    let claims = state
        .issuer
        .verify_share_access(token)
        .map_err(|_| ApiError::Unauthorized("invalid or expired access token".to_string()))?;

    if claims.code != path_code {
        return Err(ApiError::Unauthorized(
            "access token does not match this share link".to_string(),
        ));
    }

    let share_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthorized("invalid access token".to_string()))?;

    let share = state
        .metadata
        .get_share(share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("share link not found".to_string()))?;

    // The stored code is immutable, but check it anyway so a token can never
    // outlive a recycled subject id.
    if share.code != claims.code {
        return Err(ApiError::Unauthorized(
            "access token does not match this share link".to_string(),
        ));
    }

    ensure_active(&share, OffsetDateTime::now_utc())?;

    Ok(share)
}
