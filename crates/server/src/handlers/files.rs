//! Download and listing handlers for committed files.

use crate::error::{ApiError, ApiResult};
use crate::handlers::uploads::file_url;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use depot_core::DeclaredName;
use depot_metadata::FileRow;
use depot_storage::StorageError;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// A committed file as listed by the API.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub id: i64,
    pub name: String,
    /// Unix seconds, UTC.
    pub date_posted: i64,
    pub url: String,
}

impl From<FileRow> for FileEntry {
    fn from(row: FileRow) -> Self {
        Self {
            url: file_url(row.id),
            id: row.id,
            name: row.name,
            date_posted: row.date_posted,
        }
    }
}

/// Query parameters for GET /v1/files.
#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    /// Only files posted strictly after this unix timestamp.
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileEntry>,
}

/// Query parameters for GET /v1/updates.
#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    /// Only files with an id greater than this.
    #[serde(default)]
    pub last_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UpdatesResponse {
    /// Cursor for the next request.
    pub last_id: i64,
    pub files: Vec<FileEntry>,
}

/// GET /files/{file_id} - Stream a committed file.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let id: i64 = file_id
        .parse()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid file id: {file_id}")))?;

    let row = state
        .metadata
        .get_file(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {id}")))?;

    let key = id.to_string();
    // A record without content is an orphan from a failed commit.
    let missing_content = |e: StorageError| match e {
        StorageError::NotFound(_) => {
            tracing::error!(file_id = id, "File record has no stored content");
            ApiError::Internal(format!("content missing for file {id}"))
        }
        other => ApiError::Storage(other),
    };
    let meta = state.storage.head(&key).await.map_err(missing_content)?;
    let stream = state.storage.get_stream(&key).await.map_err(missing_content)?;
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    let name = DeclaredName::from_stored(row.name);
    let disposition = HeaderValue::from_str(&name.content_disposition())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (CONTENT_LENGTH, HeaderValue::from(meta.size)),
            (CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// GET /v1/files - Files posted after a timestamp, most recent first.
#[tracing::instrument(skip(state))]
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> ApiResult<Json<ListFilesResponse>> {
    let limit = state.listing_limit(query.limit);
    let rows = state
        .metadata
        .files_since_time(query.since.unwrap_or(0), limit)
        .await?;

    Ok(Json(ListFilesResponse {
        files: rows.into_iter().map(FileEntry::from).collect(),
    }))
}

/// GET /v1/updates - The next page of files after a known id, newest first.
///
/// Each page holds the oldest files past the cursor, so a client that
/// keeps passing back `last_id` sees every file.
#[tracing::instrument(skip(state))]
pub async fn get_updates(
    State(state): State<AppState>,
    Query(query): Query<UpdatesQuery>,
) -> ApiResult<Json<UpdatesResponse>> {
    let cursor = query.last_id.unwrap_or(0);
    let limit = state.listing_limit(query.limit);
    let rows = state.metadata.files_since_id(cursor, limit).await?;

    let last_id = rows.iter().map(|row| row.id).max().unwrap_or(cursor);
    Ok(Json(UpdatesResponse {
        last_id,
        files: rows.into_iter().map(FileEntry::from).collect(),
    }))
}
