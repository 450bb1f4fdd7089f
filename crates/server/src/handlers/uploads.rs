//! Upload handlers: begin, transfer, and progress.

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_upload_error;
use crate::sessions::UploadSession;
use crate::state::AppState;
use crate::transaction::StagedFile;
use crate::transfer::{CommittedFile, run_transfer};
use axum::Json;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{Path, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use depot_core::upload::{BeginUploadResponse, ProgressResponse, UploadResponse};
use depot_core::{DeclaredName, SessionId};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

/// Name of the multipart part carrying the file.
pub const FILE_PART: &str = "file";

/// Download path for a committed file.
pub fn file_url(file_id: i64) -> String {
    format!("/files/{file_id}")
}

/// POST /v1/uploads - Begin an upload session.
#[tracing::instrument(skip(state))]
pub async fn begin_upload(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<BeginUploadResponse>)> {
    let upload_id = state.sessions.create()?;
    Ok((
        StatusCode::CREATED,
        Json(BeginUploadResponse {
            status: "success".to_string(),
            upload_id,
        }),
    ))
}

/// GET /v1/uploads/{upload_id} - Poll upload progress.
///
/// The first poll that observes a completed transfer is also the last.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn get_upload_progress(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<ProgressResponse>> {
    let id = SessionId::parse(&upload_id)?;
    let progress = state
        .sessions
        .poll(id)
        .ok_or_else(|| ApiError::NotFound(format!("no such upload session: {id}")))?;
    Ok(Json(progress.into()))
}

/// POST /v1/uploads/{upload_id} - Stream the `file` part of a multipart body.
#[tracing::instrument(skip(state, headers, multipart), fields(upload_id = %upload_id))]
pub async fn upload_file(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let id = SessionId::parse(&upload_id)?;

    let declared_total = declared_length(&headers)?;
    let max = state.config.server.max_upload_size;
    if let Some(total) = declared_total
        && total > max
    {
        record_upload_error("payload_too_large");
        return Err(ApiError::PayloadTooLarge(format!(
            "declared length {total} exceeds maximum {max}"
        )));
    }

    let session = state.sessions.claim(id, declared_total)?;

    match receive_file(&state, &session, multipart).await {
        Ok((committed, name)) => {
            session.set_file_id(committed.file_id);
            state
                .sessions
                .retire_after(id, state.config.server.completed_retention());
            tracing::info!(
                file_id = committed.file_id,
                bytes = committed.bytes,
                "Upload stored"
            );
            Ok((
                StatusCode::CREATED,
                Json(UploadResponse {
                    status: "success".to_string(),
                    file_id: committed.file_id,
                    name: name.into_inner(),
                    url: file_url(committed.file_id),
                }),
            ))
        }
        Err(e) => {
            state.sessions.delete(id);
            record_upload_error(e.code());
            tracing::warn!(error = %e, "Upload failed, session retired");
            Err(e)
        }
    }
}

/// Find the `file` part, stage it, and run the transfer.
async fn receive_file(
    state: &AppState,
    session: &UploadSession,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(CommittedFile, DeclaredName)> {
    let mut multipart = multipart
        .map_err(|e| ApiError::BadRequest(format!("expected a multipart body: {}", e.body_text())))?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_PART) {
            tracing::debug!(part = ?field.name(), "Skipping multipart part");
            continue;
        }

        let name = DeclaredName::sanitize(field.file_name().unwrap_or_default());
        let staged =
            StagedFile::prepare(name.clone(), state.metadata.as_ref(), state.storage.clone())
                .await?;

        let reader = StreamReader::new(field.map_err(std::io::Error::other));
        tokio::pin!(reader);

        let committed = run_transfer(
            reader,
            staged,
            session,
            state.metadata.as_ref(),
            state.transfer_limits(),
        )
        .await?;
        return Ok((committed, name));
    }

    Err(ApiError::BadRequest(format!(
        "multipart body has no '{FILE_PART}' part"
    )))
}

/// Parse the declared request length, if any.
fn declared_length(headers: &HeaderMap) -> ApiResult<Option<u64>> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest("invalid Content-Length header".to_string()))
}
