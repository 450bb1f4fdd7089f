//! Capability discovery endpoint.

use crate::error::ApiResult;
use crate::handlers::uploads::FILE_PART;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Largest accepted upload request, in bytes.
    pub max_upload_size: u64,
    /// Size of each read from an upload body, in bytes.
    pub read_chunk_size: usize,
    /// Seconds a begun upload may wait before its transfer starts.
    pub session_grace_secs: u64,
    /// Multipart part name the upload endpoint reads.
    pub file_part: &'static str,
    /// API version.
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    Ok(Json(CapabilitiesResponse {
        max_upload_size: state.config.server.max_upload_size,
        read_chunk_size: state.config.server.read_chunk_size,
        session_grace_secs: state.config.server.session_grace_secs,
        file_part: FILE_PART,
        api_version: "v1",
    }))
}
