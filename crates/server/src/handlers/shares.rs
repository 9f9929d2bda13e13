//! Owner-side share bundle management.
//!
//! Creation, listing, expiration updates, revocation, deletion, and the
//! per-bundle access log. The public, code-addressed surface lives in
//! `share_public.rs` and `share_download.rs`.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    PageQuery, Paginated, Pagination, client_ip, log_access, parse_json_body, parse_uuid, rfc3339,
    user_agent,
};
use crate::metrics::{SHARES_CREATED, SHARES_REVOKED};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use satchel_core::{
    AccessEventKind, SHARE_CODE_LENGTH, SHARE_CODE_RETRY_LIMIT, generate_share_code,
    normalize_email,
};
use satchel_mailer::templates::{ShareInvitation, SharedExamSummary, share_invitation_email};
use satchel_metadata::models::{AccessEventRow, ExamRow, ShareLinkRow};
use satchel_metadata::repos::ShareListFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const MAX_SHARE_EXAMS: usize = 50;
const MAX_EMAIL_LENGTH: usize = 255;
const MAX_MESSAGE_LENGTH: usize = 1000;
const MAX_EXPIRES_IN_DAYS: u16 = 365;
const MAX_MAX_USES: u32 = 100;
/// Cap for the per-exam convenience listing, which has no pagination.
const EXAM_SHARES_LIMIT: u32 = 100;

/// Share creation request.
#[derive(Deserialize)]
pub struct CreateShareRequest {
    pub exam_ids: Vec<String>,
    pub email: String,
    pub expires_in_days: Option<u16>,
    pub max_uses: Option<u32>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateExpirationRequest {
    pub expires_in_days: u16,
}

/// Query parameters for the owner share listing.
#[derive(Deserialize)]
pub struct ShareListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub active: Option<bool>,
    pub exam_id: Option<String>,
}

/// Exam entry embedded in an owner share representation.
#[derive(Serialize)]
pub struct ShareExamResponse {
    pub id: String,
    pub name: String,
    pub exam_date: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
}

/// Owner representation of a share bundle. The OTP challenge state stays
/// internal; only derived flags are exposed.
#[derive(Serialize)]
pub struct ShareResponse {
    pub id: String,
    pub code: String,
    pub share_url: String,
    pub recipient_email: String,
    pub message: Option<String>,
    pub expires_at: String,
    pub max_uses: i64,
    pub times_used: i64,
    pub revoked_at: Option<String>,
    pub is_expired: bool,
    pub is_revoked: bool,
    pub is_max_uses_reached: bool,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub exams: Vec<ShareExamResponse>,
}

#[derive(Serialize)]
pub struct ShareStatsResponse {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
}

/// Access log entry as shown to the bundle owner.
#[derive(Serialize)]
pub struct AccessLogResponse {
    pub id: String,
    pub event: String,
    pub email_input: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

fn access_log_response(row: &AccessEventRow) -> ApiResult<AccessLogResponse> {
    Ok(AccessLogResponse {
        id: row.event_id.to_string(),
        event: row.event.clone(),
        email_input: row.email_input.clone(),
        ip_address: row.ip_address.clone(),
        user_agent: row.user_agent.clone(),
        created_at: rfc3339(row.created_at)?,
    })
}

pub(crate) fn share_url(state: &AppState, code: &str) -> String {
    format!("{}/s/{code}", state.config.server.public_base_url)
}

fn share_exam_response(exam: &ExamRow) -> ShareExamResponse {
    ShareExamResponse {
        id: exam.exam_id.to_string(),
        name: exam.exam_name.clone(),
        exam_date: exam.exam_date.map(|d| d.to_string()),
        notes: exam.notes.clone(),
        tags: exam.tags.clone(),
    }
}

fn owner_share_response(
    state: &AppState,
    share: &ShareLinkRow,
    exams: &[ExamRow],
    now: OffsetDateTime,
) -> ApiResult<ShareResponse> {
    Ok(ShareResponse {
        id: share.share_id.to_string(),
        code: share.code.clone(),
        share_url: share_url(state, &share.code),
        recipient_email: share.recipient_email.clone(),
        message: share.message.clone(),
        expires_at: rfc3339(share.expires_at)?,
        max_uses: share.max_uses,
        times_used: share.times_used,
        revoked_at: share.revoked_at.map(rfc3339).transpose()?,
        is_expired: share.is_expired(now),
        is_revoked: share.is_revoked(),
        is_max_uses_reached: share.is_max_uses_reached(),
        is_active: share.is_active(now),
        created_at: rfc3339(share.created_at)?,
        updated_at: rfc3339(share.updated_at)?,
        exams: exams.iter().map(share_exam_response).collect(),
    })
}

/// Fetch a share bundle and confirm the caller owns it.
async fn resolve_owned_share(
    state: &AppState,
    share_id: Uuid,
    user_id: Uuid,
) -> ApiResult<ShareLinkRow> {
    let share = state
        .metadata
        .get_share(share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("share link not found".to_string()))?;
    if share.user_id != user_id {
        return Err(ApiError::Forbidden(
            "you do not own this share link".to_string(),
        ));
    }
    Ok(share)
}

fn validate_recipient_email(email: &str) -> ApiResult<String> {
    let email = normalize_email(email);
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation(
            "a valid recipient email is required".to_string(),
        ));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ApiError::Validation(format!(
            "email must be at most {MAX_EMAIL_LENGTH} characters"
        )));
    }
    Ok(email)
}

/// POST /api/share-links - Create a share bundle and notify the recipient.
#[tracing::instrument(skip(state, req))]
pub async fn create_share(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ShareResponse>)> {
    let auth = require_auth(&req)?.clone();
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let body: CreateShareRequest = parse_json_body(req).await?;

    if body.exam_ids.is_empty() {
        return Err(ApiError::Validation(
            "at least one exam is required".to_string(),
        ));
    }
    if body.exam_ids.len() > MAX_SHARE_EXAMS {
        return Err(ApiError::Validation(format!(
            "at most {MAX_SHARE_EXAMS} exams can be shared at once"
        )));
    }
    let mut exam_ids = body
        .exam_ids
        .iter()
        .map(|id| parse_uuid(id, "exam"))
        .collect::<ApiResult<Vec<_>>>()?;
    let mut seen = HashSet::new();
    exam_ids.retain(|id| seen.insert(*id));

    let email = validate_recipient_email(&body.email)?;

    let expires_in_days = body
        .expires_in_days
        .unwrap_or(state.config.share.default_expires_in_days);
    if expires_in_days == 0 || expires_in_days > MAX_EXPIRES_IN_DAYS {
        return Err(ApiError::Validation(format!(
            "expires_in_days must be between 1 and {MAX_EXPIRES_IN_DAYS}"
        )));
    }
    let max_uses = body.max_uses.unwrap_or(state.config.share.default_max_uses);
    if max_uses == 0 || max_uses > MAX_MAX_USES {
        return Err(ApiError::Validation(format!(
            "max_uses must be between 1 and {MAX_MAX_USES}"
        )));
    }
    if let Some(message) = &body.message
        && message.len() > MAX_MESSAGE_LENGTH
    {
        return Err(ApiError::Validation(format!(
            "message must be at most {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    let exams = state
        .metadata
        .list_exams_by_ids_for_user(auth.user_id, &exam_ids)
        .await?;
    if exams.len() != exam_ids.len() {
        return Err(ApiError::NotFound(
            "one or more exams were not found".to_string(),
        ));
    }

    // Codes are random; a collision just means another draw.
    let mut code = generate_share_code(SHARE_CODE_LENGTH);
    let mut retries = 0u32;
    while state.metadata.code_exists(&code).await? {
        retries += 1;
        if retries > SHARE_CODE_RETRY_LIMIT {
            return Err(ApiError::Validation(
                "failed to generate a unique share code".to_string(),
            ));
        }
        code = generate_share_code(SHARE_CODE_LENGTH);
    }

    let now = OffsetDateTime::now_utc();
    let share = ShareLinkRow {
        share_id: Uuid::new_v4(),
        user_id: auth.user_id,
        code,
        recipient_email: email,
        message: body.message,
        expires_at: now + Duration::days(expires_in_days as i64),
        max_uses: max_uses as i64,
        times_used: 0,
        revoked_at: None,
        otp_hash: None,
        otp_expires_at: None,
        otp_attempts: 0,
        otp_sent_at: None,
        otp_sent_count: 0,
        created_at: now,
        updated_at: now,
    };
    state
        .metadata
        .create_share_with_exams(&share, &exam_ids)
        .await?;

    SHARES_CREATED.inc();

    // The bundle exists either way; a failed notification must not undo it.
    let url = share_url(&state, &share.code);
    let summaries: Vec<SharedExamSummary> = exams
        .iter()
        .map(|e| SharedExamSummary {
            name: e.exam_name.clone(),
            exam_date: e.exam_date,
            notes: e.notes.clone(),
        })
        .collect();
    let invitation = ShareInvitation {
        share_url: &url,
        message: share.message.as_deref(),
        expires_on: share.expires_at.date(),
        exams: &summaries,
    };
    let mail = share_invitation_email(&share.recipient_email, &invitation);
    let email_event = match state.mailer.send(&mail).await {
        Ok(()) => AccessEventKind::ShareEmailSent,
        Err(e) => {
            tracing::warn!(
                share_id = %share.share_id,
                error = %e,
                "failed to send share notification email"
            );
            AccessEventKind::ShareEmailFailed
        }
    };
    log_access(
        &state.metadata,
        Some(share.share_id),
        email_event,
        Some(&share.recipient_email),
        &ip,
        agent.as_deref(),
    )
    .await;
    log_access(
        &state.metadata,
        Some(share.share_id),
        AccessEventKind::ShareCreated,
        Some(&share.recipient_email),
        &ip,
        agent.as_deref(),
    )
    .await;

    tracing::info!(
        share_id = %share.share_id,
        code = %share.code,
        exam_count = exams.len(),
        "share link created"
    );

    Ok((
        StatusCode::CREATED,
        Json(owner_share_response(&state, &share, &exams, now)?),
    ))
}

/// GET /api/share-links - Paginated listing with optional filters.
pub async fn list_shares(
    State(state): State<AppState>,
    Query(query): Query<ShareListQuery>,
    req: Request,
) -> ApiResult<Json<Paginated<ShareResponse>>> {
    let auth = require_auth(&req)?;
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve();

    let filter = ShareListFilter {
        page,
        limit,
        active: query.active,
        exam_id: query
            .exam_id
            .as_deref()
            .map(|id| parse_uuid(id, "exam"))
            .transpose()?,
    };

    let now = OffsetDateTime::now_utc();
    let total = state
        .metadata
        .count_shares_for_user(auth.user_id, &filter, now)
        .await?;
    let shares = state
        .metadata
        .list_shares_for_user(auth.user_id, &filter, now)
        .await?;
    let mut data = Vec::with_capacity(shares.len());
    for share in &shares {
        let exams = state.metadata.list_exams_for_share(share.share_id).await?;
        data.push(owner_share_response(&state, share, &exams, now)?);
    }

    Ok(Json(Paginated {
        data,
        pagination: Pagination::new(total, page, limit),
    }))
}

/// GET /api/share-links/stats - Aggregate counts for the dashboard.
pub async fn share_stats(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<ShareStatsResponse>> {
    let auth = require_auth(&req)?;
    let stats = state
        .metadata
        .share_stats_for_user(auth.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(ShareStatsResponse {
        total: stats.total,
        active: stats.active,
        expired: stats.expired,
    }))
}

/// GET /api/share-links/exam/{exam_id} - Bundles that include one exam.
pub async fn list_shares_for_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<ShareResponse>>> {
    let auth = require_auth(&req)?;
    let exam_id = parse_uuid(&exam_id, "exam")?;

    state
        .metadata
        .get_exam_for_user(exam_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("exam not found".to_string()))?;

    let filter = ShareListFilter {
        page: 1,
        limit: EXAM_SHARES_LIMIT,
        active: None,
        exam_id: Some(exam_id),
    };
    let now = OffsetDateTime::now_utc();
    let shares = state
        .metadata
        .list_shares_for_user(auth.user_id, &filter, now)
        .await?;
    let mut data = Vec::with_capacity(shares.len());
    for share in &shares {
        let exams = state.metadata.list_exams_for_share(share.share_id).await?;
        data.push(owner_share_response(&state, share, &exams, now)?);
    }

    Ok(Json(data))
}

/// GET /api/share-links/{id} - One bundle with its exams.
pub async fn get_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ShareResponse>> {
    let auth = require_auth(&req)?;
    let share_id = parse_uuid(&share_id, "share link")?;

    let share = resolve_owned_share(&state, share_id, auth.user_id).await?;
    let exams = state.metadata.list_exams_for_share(share_id).await?;

    Ok(Json(owner_share_response(
        &state,
        &share,
        &exams,
        OffsetDateTime::now_utc(),
    )?))
}

/// PATCH /api/share-links/{id}/expiration - Re-anchor the expiry at now + N days.
pub async fn update_share_expiration(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ShareResponse>> {
    let auth = require_auth(&req)?.clone();
    let share_id = parse_uuid(&share_id, "share link")?;
    let body: UpdateExpirationRequest = parse_json_body(req).await?;

    if body.expires_in_days == 0 || body.expires_in_days > MAX_EXPIRES_IN_DAYS {
        return Err(ApiError::Validation(format!(
            "expires_in_days must be between 1 and {MAX_EXPIRES_IN_DAYS}"
        )));
    }

    resolve_owned_share(&state, share_id, auth.user_id).await?;

    // Always anchored at now, never at the previous expiry.
    let now = OffsetDateTime::now_utc();
    let expires_at = now + Duration::days(body.expires_in_days as i64);
    state
        .metadata
        .update_share_expiration(share_id, expires_at, now)
        .await?;

    let share = state
        .metadata
        .get_share(share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("share link not found".to_string()))?;
    let exams = state.metadata.list_exams_for_share(share_id).await?;

    tracing::info!(share_id = %share_id, expires_at = %expires_at, "share expiration updated");

    Ok(Json(owner_share_response(&state, &share, &exams, now)?))
}

/// POST /api/share-links/{id}/revoke - Revoke a bundle. Idempotent.
#[tracing::instrument(skip(state, req), fields(share_id = %share_id))]
pub async fn revoke_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let share_id = parse_uuid(&share_id, "share link")?;

    resolve_owned_share(&state, share_id, auth.user_id).await?;

    state
        .metadata
        .revoke_share(share_id, OffsetDateTime::now_utc())
        .await?;

    SHARES_REVOKED.inc();
    log_access(
        &state.metadata,
        Some(share_id),
        AccessEventKind::ShareRevoked,
        None,
        &ip,
        agent.as_deref(),
    )
    .await;

    tracing::info!(share_id = %share_id, "share link revoked");

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/share-links/{id} - Delete a bundle and its history.
#[tracing::instrument(skip(state, req), fields(share_id = %share_id))]
pub async fn delete_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    let share_id = parse_uuid(&share_id, "share link")?;

    resolve_owned_share(&state, share_id, auth.user_id).await?;
    state.metadata.delete_share(share_id, auth.user_id).await?;

    tracing::info!(share_id = %share_id, "share link deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/share-links/{id}/logs - Paginated access history, newest first.
pub async fn share_logs(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Query(query): Query<PageQuery>,
    req: Request,
) -> ApiResult<Json<Paginated<AccessLogResponse>>> {
    let auth = require_auth(&req)?;
    let share_id = parse_uuid(&share_id, "share link")?;
    let (page, limit) = query.resolve();

    resolve_owned_share(&state, share_id, auth.user_id).await?;

    let total = state.metadata.count_events_for_share(share_id).await?;
    let offset = (page - 1).saturating_mul(limit);
    let events = state
        .metadata
        .list_events_for_share(share_id, limit, offset)
        .await?;
    let data = events
        .iter()
        .map(access_log_response)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(Paginated {
        data,
        pagination: Pagination::new(total, page, limit),
    }))
}
