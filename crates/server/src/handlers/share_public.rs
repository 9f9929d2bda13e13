//! Public, code-addressed share endpoints: summary, OTP request, OTP verify.
//!
//! Every failure lands in the access ledger with a distinct event, so the
//! owner can see exactly what happened against their link. Ledger writes are
//! best-effort and never mask the response.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{client_ip, log_access, parse_json_body, rfc3339, user_agent};
use crate::limits::{check_send_allowance, check_verify_allowance};
use crate::metrics::{OTP_SEND_FAILURES, OTP_SENT, OTP_VERIFIED, record_otp_verify_failure};
use crate::share_access::{ensure_active, expired_error, revoked_error};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use satchel_core::{AccessEventKind, OTP_MAX_ATTEMPTS, OTP_TTL, generate_otp, normalize_email};
use satchel_credentials::{hash_secret, verify_secret};
use satchel_mailer::templates::verification_code_email;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Deserialize)]
pub struct RequestAccessRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ValidateOtpRequest {
    pub email: String,
    pub otp: String,
}

/// One downloadable file in the public summary.
#[derive(Serialize)]
pub struct PublicFileResponse {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub size_bytes: i64,
    pub download_url: String,
}

#[derive(Serialize)]
pub struct PublicExamResponse {
    pub id: String,
    pub name: String,
    pub exam_date: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
    pub files: Vec<PublicFileResponse>,
}

/// Public view of a bundle. The recipient email and the OTP challenge state
/// are deliberately absent.
#[derive(Serialize)]
pub struct PublicShareResponse {
    pub code: String,
    pub message: Option<String>,
    pub expires_at: String,
    pub max_uses: i64,
    pub times_used: i64,
    pub exams: Vec<PublicExamResponse>,
    pub download_all_url: String,
}

#[derive(Serialize)]
pub struct RequestAccessResponse {
    pub message: &'static str,
    /// Minutes until the verification code expires.
    pub expires_in: i64,
    /// The raw code, exposed only when `share.expose_otp` is enabled for
    /// local debugging. Never enabled in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Serialize)]
pub struct ValidatedExamResponse {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
pub struct ValidatedShareResponse {
    pub code: String,
    pub message: Option<String>,
    pub download_all_url: String,
    pub exams: Vec<ValidatedExamResponse>,
}

#[derive(Serialize)]
pub struct ValidateOtpResponse {
    pub access_token: String,
    /// Minutes until the access token expires.
    pub expires_in: i64,
    pub share: ValidatedShareResponse,
}

/// GET /s/{code} - Public bundle summary.
///
/// Requires no authentication; the code itself is the capability to see the
/// listing. File downloads still require a verified access token. This is
/// the one read on the public surface with no ledger write.
#[tracing::instrument(skip(state), fields(code = %code))]
pub async fn public_share_summary(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<PublicShareResponse>> {
    let now = OffsetDateTime::now_utc();

    let share = state
        .metadata
        .get_share_by_code(&code)
        .await?
        .ok_or_else(|| ApiError::NotFound("share link not found".to_string()))?;
    ensure_active(&share, now)?;

    let exams = state.metadata.list_exams_for_share(share.share_id).await?;
    let mut exam_entries = Vec::with_capacity(exams.len());
    for exam in &exams {
        let media = state.metadata.list_media_for_exam(exam.exam_id).await?;
        let files = media
            .iter()
            .map(|m| PublicFileResponse {
                id: m.media_id.to_string(),
                kind: m.kind().as_str().to_string(),
                name: m.file_name.clone(),
                size_bytes: m.size_bytes,
                download_url: format!("/s/{}/files/{}/download", share.code, m.media_id),
            })
            .collect();
        exam_entries.push(PublicExamResponse {
            id: exam.exam_id.to_string(),
            name: exam.exam_name.clone(),
            exam_date: exam.exam_date.map(|d| d.to_string()),
            notes: exam.notes.clone(),
            tags: exam.tags.clone(),
            files,
        });
    }

    Ok(Json(PublicShareResponse {
        code: share.code.clone(),
        message: share.message.clone(),
        expires_at: rfc3339(share.expires_at)?,
        max_uses: share.max_uses,
        times_used: share.times_used,
        exams: exam_entries,
        download_all_url: format!("/s/{}/download-all", share.code),
    }))
}

/// POST /s/{code}/request-access - Start the email OTP challenge.
#[tracing::instrument(skip(state, req), fields(code = %code))]
pub async fn request_access(
    State(state): State<AppState>,
    Path(code): Path<String>,
    req: Request,
) -> ApiResult<Json<RequestAccessResponse>> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let body: RequestAccessRequest = parse_json_body(req).await?;
    let submitted = normalize_email(&body.email);
    let now = OffsetDateTime::now_utc();

    let Some(share) = state.metadata.get_share_by_code(&code).await? else {
        log_access(
            &state.metadata,
            None,
            AccessEventKind::OtpRequestFailed,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::NotFound("share link not found".to_string()));
    };

    if share.is_revoked() {
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpRequestFailedRevoked,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(revoked_error());
    }
    if share.is_expired(now) {
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpRequestFailedExpired,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(expired_error());
    }
    if submitted != normalize_email(&share.recipient_email) {
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpRequestFailedWrongEmail,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::Unauthorized(
            "the email address does not match this share link".to_string(),
        ));
    }
    if let Err(e) = check_send_allowance(&state.metadata, share.share_id, &ip, now).await {
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpRequestFailedRateLimit,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(e);
    }

    // A fresh challenge always replaces any outstanding one and resets the
    // attempt counter.
    let otp = generate_otp();
    let otp_hash = hash_secret(&otp)?;
    state
        .metadata
        .set_otp_challenge(share.share_id, &otp_hash, now + OTP_TTL, now)
        .await?;

    let exams = state.metadata.list_exams_for_share(share.share_id).await?;
    let exam_names = exams
        .iter()
        .map(|e| e.exam_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mail = verification_code_email(&share.recipient_email, &otp, &exam_names);
    if let Err(e) = state.mailer.send(&mail).await {
        OTP_SEND_FAILURES.inc();
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpSendFailed,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        tracing::error!(share_id = %share.share_id, error = %e, "failed to deliver verification code");
        return Err(ApiError::Mail(e));
    }

    OTP_SENT.inc();
    log_access(
        &state.metadata,
        Some(share.share_id),
        AccessEventKind::OtpSent,
        Some(&submitted),
        &ip,
        agent.as_deref(),
    )
    .await;

    tracing::info!(share_id = %share.share_id, "verification code sent");

    Ok(Json(RequestAccessResponse {
        message: "a verification code has been sent to the recipient's email address",
        expires_in: OTP_TTL.whole_minutes(),
        otp: state.config.share.expose_otp.then_some(otp),
    }))
}

/// POST /s/{code}/validate-otp - Redeem the challenge for an access token.
///
/// The attempt counter is incremented before the comparison, so a crashed or
/// raced request still consumes an attempt.
#[tracing::instrument(skip(state, req), fields(code = %code))]
pub async fn validate_otp(
    State(state): State<AppState>,
    Path(code): Path<String>,
    req: Request,
) -> ApiResult<Json<ValidateOtpResponse>> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let body: ValidateOtpRequest = parse_json_body(req).await?;
    let submitted = normalize_email(&body.email);
    let now = OffsetDateTime::now_utc();

    let Some(share) = state.metadata.get_share_by_code(&code).await? else {
        record_otp_verify_failure("invalid_code");
        log_access(
            &state.metadata,
            None,
            AccessEventKind::OtpVerifyFailedInvalidCode,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::NotFound("share link not found".to_string()));
    };

    if share.is_revoked() {
        record_otp_verify_failure("revoked");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedRevoked,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(revoked_error());
    }
    if share.is_expired(now) {
        record_otp_verify_failure("expired");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedExpired,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(expired_error());
    }
    if submitted != normalize_email(&share.recipient_email) {
        record_otp_verify_failure("wrong_email");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedWrongEmail,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::Unauthorized(
            "the email address does not match this share link".to_string(),
        ));
    }

    let Some(otp_hash) = share.otp_hash.as_deref() else {
        record_otp_verify_failure("no_challenge");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedNoOtp,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::Validation(
            "no verification code has been requested for this share link".to_string(),
        ));
    };
    if !share.otp_expires_at.is_some_and(|at| at > now) {
        record_otp_verify_failure("otp_expired");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedOtpExpired,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::Validation(
            "the verification code has expired, request a new one".to_string(),
        ));
    }
    // Exhaustion wins over a correct code: once the budget is spent, only a
    // fresh challenge can unlock the bundle.
    if share.otp_attempts >= OTP_MAX_ATTEMPTS {
        record_otp_verify_failure("max_attempts");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedMaxAttempts,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::Validation(
            "too many incorrect attempts, request a new verification code".to_string(),
        ));
    }
    if let Err(e) = check_verify_allowance(&state.metadata, share.share_id, &ip, now).await {
        record_otp_verify_failure("rate_limited");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedRateLimit,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(e);
    }

    // Count the attempt before comparing so a raced or aborted request can
    // never retry for free.
    state.metadata.increment_otp_attempts(share.share_id).await?;

    if !verify_secret(&body.otp, otp_hash) {
        record_otp_verify_failure("invalid_otp");
        log_access(
            &state.metadata,
            Some(share.share_id),
            AccessEventKind::OtpVerifyFailedInvalid,
            Some(&submitted),
            &ip,
            agent.as_deref(),
        )
        .await;
        return Err(ApiError::Unauthorized(
            "incorrect verification code".to_string(),
        ));
    }

    state.metadata.clear_otp_challenge(share.share_id, now).await?;
    state.metadata.increment_times_used(share.share_id, now).await?;

    let access_token = state.issuer.issue_share_access(share.share_id, &share.code)?;

    OTP_VERIFIED.inc();
    log_access(
        &state.metadata,
        Some(share.share_id),
        AccessEventKind::OtpVerified,
        Some(&submitted),
        &ip,
        agent.as_deref(),
    )
    .await;

    tracing::info!(share_id = %share.share_id, "share access granted");

    let exams = state.metadata.list_exams_for_share(share.share_id).await?;
    let download_all_url = format!("/s/{}/download-all?token={access_token}", share.code);

    Ok(Json(ValidateOtpResponse {
        access_token,
        expires_in: satchel_core::SHARE_ACCESS_TTL.whole_minutes(),
        share: ValidatedShareResponse {
            code: share.code.clone(),
            message: share.message.clone(),
            download_all_url,
            exams: exams
                .iter()
                .map(|e| ValidatedExamResponse {
                    id: e.exam_id.to_string(),
                    name: e.exam_name.clone(),
                })
                .collect(),
        },
    }))
}
