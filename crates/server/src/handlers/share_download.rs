//! Token-gated file retrieval for verified share recipients.
//!
//! Every endpoint here revalidates the access token against the bundle
//! before serving anything; the token alone is never sufficient.

use crate::auth::extract_bearer_token;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{client_ip, log_access, parse_uuid, user_agent};
use crate::metrics::{
    ARCHIVE_BUILD_DURATION, SHARE_ARCHIVES_DOWNLOADED, SHARE_FILES_DOWNLOADED, SHARE_VIEWS,
};
use crate::share_access::authorize_share_access;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use satchel_core::{AccessEventKind, safe_file_name};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use time::OffsetDateTime;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// One entry in the flattened file listing, carrying its exam context.
#[derive(Serialize)]
pub struct ShareFileResponse {
    pub id: String,
    pub exam_id: String,
    pub exam_name: String,
    pub exam_date: Option<String>,
    pub kind: String,
    pub name: String,
    pub size_bytes: i64,
    pub download_url: String,
}

/// GET /s/{code}/files - Flattened listing of every file in the bundle.
///
/// Download URLs carry the caller's token so they work as plain links.
#[tracing::instrument(skip(state, req, query), fields(code = %code))]
pub async fn list_share_files(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<TokenQuery>,
    req: Request,
) -> ApiResult<Json<Vec<ShareFileResponse>>> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let share = authorize_share_access(&state, extract_bearer_token(&req), &code, query.token.as_deref()).await?;
    // authorize_share_access has already required one of these to be present.
    let token = extract_bearer_token(&req)
        .or(query.token.as_deref())
        .unwrap_or_default();

    let exams = state.metadata.list_exams_for_share(share.share_id).await?;
    let mut files = Vec::new();
    for exam in &exams {
        let media = state.metadata.list_media_for_exam(exam.exam_id).await?;
        for m in &media {
            files.push(ShareFileResponse {
                id: m.media_id.to_string(),
                exam_id: exam.exam_id.to_string(),
                exam_name: exam.exam_name.clone(),
                exam_date: exam.exam_date.map(|d| d.to_string()),
                kind: m.kind().as_str().to_string(),
                name: m.file_name.clone(),
                size_bytes: m.size_bytes,
                download_url: format!(
                    "/s/{}/files/{}/download?token={token}",
                    share.code, m.media_id
                ),
            });
        }
    }

    SHARE_VIEWS.inc();
    log_access(
        &state.metadata,
        Some(share.share_id),
        AccessEventKind::ShareViewed,
        None,
        &ip,
        agent.as_deref(),
    )
    .await;

    Ok(Json(files))
}

/// GET /s/{code}/files/{media_id}/download - Stream one file.
#[tracing::instrument(skip(state, req, query), fields(code = %code, media_id = %media_id))]
pub async fn download_share_file(
    State(state): State<AppState>,
    Path((code, media_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    req: Request,
) -> ApiResult<Response> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let share = authorize_share_access(&state, extract_bearer_token(&req), &code, query.token.as_deref()).await?;
    let media_id = parse_uuid(&media_id, "file")?;

    // Covers both a foreign file and a nonexistent one, without revealing
    // which.
    let media = state
        .metadata
        .get_media_in_share(share.share_id, media_id)
        .await?
        .ok_or_else(|| {
            ApiError::Forbidden("this file is not part of this share link".to_string())
        })?;

    let stream = state.storage.get_stream(&media.object_key).await?;

    state
        .metadata
        .increment_times_used(share.share_id, OffsetDateTime::now_utc())
        .await?;
    SHARE_FILES_DOWNLOADED.inc();
    log_access(
        &state.metadata,
        Some(share.share_id),
        AccessEventKind::FileDownloaded,
        None,
        &ip,
        agent.as_deref(),
    )
    .await;

    tracing::info!(
        share_id = %share.share_id,
        media_id = %media.media_id,
        size_bytes = media.size_bytes,
        "share file download started"
    );

    let body = Body::from_stream(
        stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string()))),
    );

    let disposition = format!("attachment; filename=\"{}\"", safe_file_name(&media.file_name));
    let length = media.size_bytes.to_string();
    let mut response = (
        StatusCode::OK,
        [
            (CONTENT_TYPE, media.mime_type.as_str()),
            (CONTENT_LENGTH, length.as_str()),
            (CONTENT_DISPOSITION, disposition.as_str()),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    )
        .into_response();

    if let Some(checksum) = &media.checksum
        && let Ok(value) = HeaderValue::from_str(&format!("\"{checksum}\""))
    {
        response.headers_mut().insert(header::ETAG, value);
    }

    Ok(response)
}

/// GET /s/{code}/download-all - Bundle every file into one zip archive.
#[tracing::instrument(skip(state, req, query), fields(code = %code))]
pub async fn download_share_archive(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<TokenQuery>,
    req: Request,
) -> ApiResult<Response> {
    let ip = client_ip(&req);
    let agent = user_agent(&req);
    let share = authorize_share_access(&state, extract_bearer_token(&req), &code, query.token.as_deref()).await?;

    let exams = state.metadata.list_exams_for_share(share.share_id).await?;
    let mut entries: Vec<(String, Bytes)> = Vec::new();
    let mut total_files = 0usize;
    for exam in &exams {
        let media = state.metadata.list_media_for_exam(exam.exam_id).await?;
        total_files += media.len();
        for m in &media {
            let data = match state.storage.get(&m.object_key).await {
                Ok(data) => data,
                Err(satchel_storage::StorageError::NotFound(_)) => {
                    // A missing blob degrades the archive, it must not abort
                    // it.
                    tracing::warn!(
                        share_id = %share.share_id,
                        media_id = %m.media_id,
                        object_key = %m.object_key,
                        "blob missing, skipping archive entry"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            entries.push((
                format!(
                    "{}/{}",
                    safe_file_name(&exam.exam_name),
                    safe_file_name(&m.file_name)
                ),
                data,
            ));
        }
    }
    if total_files == 0 {
        return Err(ApiError::NotFound(
            "this share link has no files".to_string(),
        ));
    }

    let started = std::time::Instant::now();
    let (archive, entry_count) = tokio::task::spawn_blocking(move || build_archive(entries))
        .await
        .map_err(|e| ApiError::Internal(format!("archive task failed: {e}")))??;
    ARCHIVE_BUILD_DURATION.observe(started.elapsed().as_secs_f64());

    state
        .metadata
        .increment_times_used(share.share_id, OffsetDateTime::now_utc())
        .await?;
    SHARE_ARCHIVES_DOWNLOADED.inc();
    log_access(
        &state.metadata,
        Some(share.share_id),
        AccessEventKind::AllFilesDownloaded,
        None,
        &ip,
        agent.as_deref(),
    )
    .await;

    tracing::info!(
        share_id = %share.share_id,
        entries = entry_count,
        size_bytes = archive.len(),
        "share archive download started"
    );

    let file_name = format!("exams-{}.zip", OffsetDateTime::now_utc().date());
    let disposition = format!("attachment; filename=\"{file_name}\"");
    let length = archive.len().to_string();
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/zip"),
            (CONTENT_LENGTH, length.as_str()),
            (CONTENT_DISPOSITION, disposition.as_str()),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Body::from(archive),
    )
        .into_response())
}

/// Assemble the zip in memory. Runs on the blocking pool; zip compression is
/// CPU-bound.
fn build_archive(entries: Vec<(String, Bytes)>) -> ApiResult<(Vec<u8>, usize)> {
    let count = entries.len();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer
            .start_file(name, options)
            .map_err(|e| ApiError::Internal(format!("failed to start archive entry: {e}")))?;
        writer
            .write_all(&data)
            .map_err(|e| ApiError::Internal(format!("failed to write archive entry: {e}")))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| ApiError::Internal(format!("failed to finish archive: {e}")))?;
    Ok((cursor.into_inner(), count))
}
