//! Exam CRUD handlers.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{PageQuery, Paginated, Pagination, parse_json_body, parse_uuid, rfc3339};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use satchel_metadata::models::{ExamRow, ExamUpdate};
use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Iso8601;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

const MAX_EXAM_NAME_LENGTH: usize = 255;

/// Deserialize a field that distinguishes "absent" from an explicit `null`.
/// Absent stays `None` via `#[serde(default)]`; present (including `null`)
/// becomes `Some(..)`.
fn explicit_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn parse_exam_date(value: &str) -> ApiResult<Date> {
    Date::parse(value, &Iso8601::DEFAULT)
        .map_err(|e| ApiError::Validation(format!("invalid exam_date: {e}")))
}

fn validate_exam_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    if name.len() > MAX_EXAM_NAME_LENGTH {
        return Err(ApiError::Validation(format!(
            "name must be at most {MAX_EXAM_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

/// Exam creation request.
#[derive(Deserialize)]
pub struct CreateExamRequest {
    pub name: String,
    /// ISO 8601 calendar date, e.g. "2026-04-01".
    pub exam_date: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
}

/// Exam patch request. Omitted fields are left alone; an explicit `null`
/// clears the nullable fields.
#[derive(Deserialize)]
pub struct UpdateExamRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub exam_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub tags: Option<Option<String>>,
}

/// Exam representation returned to its owner.
#[derive(Serialize)]
pub struct ExamResponse {
    pub id: String,
    pub name: String,
    pub exam_date: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn exam_response(exam: &ExamRow) -> ApiResult<ExamResponse> {
    Ok(ExamResponse {
        id: exam.exam_id.to_string(),
        name: exam.exam_name.clone(),
        exam_date: exam.exam_date.map(|d| d.to_string()),
        notes: exam.notes.clone(),
        tags: exam.tags.clone(),
        created_at: rfc3339(exam.created_at)?,
        updated_at: rfc3339(exam.updated_at)?,
    })
}

/// POST /api/exams - Create an exam.
#[tracing::instrument(skip(state, req))]
pub async fn create_exam(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ExamResponse>)> {
    let auth = require_auth(&req)?.clone();
    let body: CreateExamRequest = parse_json_body(req).await?;

    let name = validate_exam_name(&body.name)?;
    let exam_date = body.exam_date.as_deref().map(parse_exam_date).transpose()?;

    let now = OffsetDateTime::now_utc();
    let exam = ExamRow {
        exam_id: Uuid::new_v4(),
        user_id: auth.user_id,
        exam_name: name,
        exam_date,
        notes: body.notes,
        tags: body.tags,
        created_at: now,
        updated_at: now,
    };
    state.metadata.create_exam(&exam).await?;

    tracing::info!(exam_id = %exam.exam_id, user_id = %auth.user_id, "exam created");

    Ok((StatusCode::CREATED, Json(exam_response(&exam)?)))
}

/// GET /api/exams - List the authenticated user's exams, newest first.
pub async fn list_exams(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    req: Request,
) -> ApiResult<Json<Paginated<ExamResponse>>> {
    let auth = require_auth(&req)?;
    let (page, limit) = query.resolve();

    let exams = state.metadata.list_exams_for_user(auth.user_id).await?;
    let total = exams.len() as u64;

    let offset = ((page as u64 - 1) * limit as u64) as usize;
    let data = exams
        .iter()
        .skip(offset)
        .take(limit as usize)
        .map(exam_response)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(Paginated {
        data,
        pagination: Pagination::new(total, page, limit),
    }))
}

/// GET /api/exams/{id} - Get one exam.
pub async fn get_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ExamResponse>> {
    let auth = require_auth(&req)?;
    let exam_id = parse_uuid(&exam_id, "exam")?;

    let exam = state
        .metadata
        .get_exam_for_user(exam_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("exam not found".to_string()))?;

    Ok(Json(exam_response(&exam)?))
}

/// PATCH /api/exams/{id} - Partially update an exam.
#[tracing::instrument(skip(state, req), fields(exam_id = %exam_id))]
pub async fn update_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ExamResponse>> {
    let auth = require_auth(&req)?.clone();
    let exam_id = parse_uuid(&exam_id, "exam")?;
    let body: UpdateExamRequest = parse_json_body(req).await?;

    let update = ExamUpdate {
        exam_name: body.name.as_deref().map(validate_exam_name).transpose()?,
        exam_date: body
            .exam_date
            .map(|inner| inner.as_deref().map(parse_exam_date).transpose())
            .transpose()?,
        notes: body.notes,
        tags: body.tags,
    };
    if update.is_empty() {
        return Err(ApiError::Validation("no fields to update".to_string()));
    }

    state
        .metadata
        .update_exam(exam_id, auth.user_id, &update, OffsetDateTime::now_utc())
        .await?;

    let exam = state
        .metadata
        .get_exam_for_user(exam_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("exam not found".to_string()))?;

    Ok(Json(exam_response(&exam)?))
}

/// DELETE /api/exams/{id} - Delete an exam, its media rows, and their blobs.
#[tracing::instrument(skip(state, req), fields(exam_id = %exam_id))]
pub async fn delete_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    let exam_id = parse_uuid(&exam_id, "exam")?;

    // Confirm ownership before touching anything.
    state
        .metadata
        .get_exam_for_user(exam_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("exam not found".to_string()))?;

    // Collect object keys first; the rows are gone after the delete.
    let media = state.metadata.list_media_for_exam(exam_id).await?;

    state.metadata.delete_exam(exam_id, auth.user_id).await?;

    // Blob deletion is best-effort; an orphaned blob is preferable to a
    // half-deleted exam.
    for row in media {
        if let Err(e) = state.storage.delete(&row.object_key).await {
            tracing::warn!(
                media_id = %row.media_id,
                object_key = %row.object_key,
                error = %e,
                "failed to delete blob for removed exam"
            );
        }
    }

    tracing::info!(exam_id = %exam_id, "exam deleted");

    Ok(StatusCode::NO_CONTENT)
}
