//! Exam file upload, listing, and deletion.
//!
//! Uploads are raw request bodies with the original file name carried in the
//! `X-File-Name` header, so clients stream the file without multipart framing.

use crate::auth::{get_trace_id, require_auth};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_uuid, rfc3339};
use crate::metrics::{BYTES_UPLOADED, FILES_UPLOADED};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use satchel_core::MediaKind;
use satchel_metadata::models::ExamMediaRow;
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Tolerance for HTTP framing overhead when reading the body; the configured
/// limit is still enforced strictly afterwards.
const UPLOAD_READ_BUFFER: usize = 1024;

const FILE_NAME_HEADER: &str = "x-file-name";
const MAX_FILE_NAME_LENGTH: usize = 255;
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Media file representation returned to the owning user.
#[derive(Serialize)]
pub struct MediaResponse {
    pub id: String,
    pub exam_id: String,
    pub name: String,
    pub kind: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub created_at: String,
}

pub(crate) fn media_response(row: &ExamMediaRow) -> ApiResult<MediaResponse> {
    Ok(MediaResponse {
        id: row.media_id.to_string(),
        exam_id: row.exam_id.to_string(),
        name: row.file_name.clone(),
        kind: row.kind().as_str().to_string(),
        mime_type: row.mime_type.clone(),
        size_bytes: row.size_bytes,
        checksum: row.checksum.clone(),
        created_at: rfc3339(row.created_at)?,
    })
}

fn file_name_from_headers(req: &Request) -> ApiResult<String> {
    let value = req
        .headers()
        .get(FILE_NAME_HEADER)
        .ok_or_else(|| ApiError::Validation("X-File-Name header is required".to_string()))?;
    let name = value
        .to_str()
        .map_err(|_| ApiError::Validation("file name must be valid UTF-8".to_string()))?
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("file name must not be empty".to_string()));
    }
    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(ApiError::Validation(format!(
            "file name must be at most {MAX_FILE_NAME_LENGTH} characters"
        )));
    }
    Ok(name)
}

/// Lowercased extension of the original name, with leading dot, or empty.
fn object_key_extension(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// POST /api/exams/{id}/files - Upload a file into an exam.
#[tracing::instrument(skip(state, req), fields(exam_id = %exam_id))]
pub async fn upload_media(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<MediaResponse>)> {
    let auth = require_auth(&req)?.clone();
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let exam_id = parse_uuid(&exam_id, "exam")?;

    state
        .metadata
        .get_exam_for_user(exam_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("exam not found".to_string()))?;

    let file_name = file_name_from_headers(&req)?;
    let mime_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();

    let max_bytes = state.config.server.max_upload_bytes;
    let bytes = axum::body::to_bytes(req.into_body(), max_bytes as usize + UPLOAD_READ_BUFFER)
        .await
        .map_err(|e| ApiError::Validation(format!("failed to read file body: {e}")))?;

    // The read buffer exists for framing overhead, not for oversized files.
    if bytes.len() as u64 > max_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "file size {} exceeds maximum {max_bytes} bytes",
            bytes.len()
        )));
    }
    if bytes.is_empty() {
        return Err(ApiError::Validation("file must not be empty".to_string()));
    }

    let checksum: String = {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    };

    let media_id = Uuid::new_v4();
    let object_key = format!(
        "{}/{exam_id}/{media_id}{}",
        auth.user_id,
        object_key_extension(&file_name)
    );
    let row = ExamMediaRow {
        media_id,
        exam_id,
        user_id: auth.user_id,
        file_name,
        media_kind: MediaKind::from_mime(&mime_type).as_str().to_string(),
        mime_type,
        size_bytes: bytes.len() as i64,
        object_key: object_key.clone(),
        checksum: Some(checksum),
        created_at: OffsetDateTime::now_utc(),
    };

    let size = bytes.len() as u64;
    state.storage.put(&object_key, bytes).await?;

    if let Err(e) = state.metadata.create_media(&row).await {
        // Keep storage and metadata consistent when the insert fails.
        if let Err(del) = state.storage.delete(&object_key).await {
            tracing::warn!(object_key = %object_key, error = %del, "failed to remove orphaned blob");
        }
        return Err(e.into());
    }

    FILES_UPLOADED.inc();
    BYTES_UPLOADED.inc_by(size);

    tracing::info!(
        trace_id = %trace_id,
        media_id = %row.media_id,
        exam_id = %exam_id,
        size_bytes = size,
        "file uploaded"
    );

    Ok((StatusCode::CREATED, Json(media_response(&row)?)))
}

/// GET /api/exams/{id}/files - List an exam's files, oldest first.
pub async fn list_media(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<MediaResponse>>> {
    let auth = require_auth(&req)?;
    let exam_id = parse_uuid(&exam_id, "exam")?;

    state
        .metadata
        .get_exam_for_user(exam_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("exam not found".to_string()))?;

    let media = state.metadata.list_media_for_exam(exam_id).await?;
    let data = media
        .iter()
        .map(media_response)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(data))
}

/// DELETE /api/files/{media_id} - Delete one file and its blob.
#[tracing::instrument(skip(state, req), fields(media_id = %media_id))]
pub async fn delete_media(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    let media_id = parse_uuid(&media_id, "file")?;

    let row = state.metadata.delete_media(media_id, auth.user_id).await?;

    // Blob deletion is best-effort; the row is already gone.
    if let Err(e) = state.storage.delete(&row.object_key).await {
        tracing::warn!(
            media_id = %media_id,
            object_key = %row.object_key,
            error = %e,
            "failed to delete blob for removed file"
        );
    }

    tracing::info!(media_id = %media_id, "file deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(object_key_extension("scan.PDF"), ".pdf");
        assert_eq!(object_key_extension("report.tar.gz"), ".gz");
        assert_eq!(object_key_extension("no_extension"), "");
    }
}
