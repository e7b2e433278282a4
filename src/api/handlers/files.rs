use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::error::ApiResult;
use crate::objstore::ListEntry;

/// Files larger than this are returned as a presigned URL instead of being
/// streamed through the control plane (spec.md §6).
const INLINE_DOWNLOAD_MAX_BYTES: u64 = 10 * 1024 * 1024;
const PRESIGN_TTL_SECS: u64 = 3600;

fn file_uri(workspace_uri: &str, rel_path: &str) -> String {
    format!("{}{}", workspace_uri, rel_path.trim_start_matches('/'))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path((session_id, rel_path)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.get_session(&session_id).await?;
    let uri = file_uri(&session.workspace_uri, &rel_path);
    state.objstore.upload(&uri, body.to_vec(), "application/octet-stream").await?;
    Ok(Json(serde_json::json!({ "uploaded": true, "path": rel_path })))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((session_id, rel_path)): Path<(String, String)>,
) -> ApiResult<Response> {
    let session = state.sessions.get_session(&session_id).await?;
    let uri = file_uri(&session.workspace_uri, &rel_path);

    let info = state.objstore.info(&uri).await?;
    if info.size > INLINE_DOWNLOAD_MAX_BYTES {
        let url = state.objstore.presign(&uri, PRESIGN_TTL_SECS).await?;
        return Ok(Json(serde_json::json!({ "presigned_url": url, "size": info.size })).into_response());
    }

    let bytes = state.objstore.download(&uri).await?;
    Ok((StatusCode::OK, bytes).into_response())
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

impl From<ListEntry> for FileEntry {
    fn from(e: ListEntry) -> Self {
        Self { key: e.key, size: e.size, last_modified: e.last_modified, etag: e.etag }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListFilesQuery {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(q): Query<ListFilesQuery>,
) -> ApiResult<Json<Vec<FileEntry>>> {
    let session = state.sessions.get_session(&session_id).await?;
    let prefix = file_uri(&session.workspace_uri, &q.prefix.unwrap_or_default());
    let limit = q.limit.unwrap_or(1000);
    let entries = state.objstore.list(&prefix, limit).await?;
    Ok(Json(entries.into_iter().map(FileEntry::from).collect()))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path((session_id, rel_path)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.get_session(&session_id).await?;
    let uri = file_uri(&session.workspace_uri, &rel_path);
    state.objstore.delete(&uri).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_workspace_and_relative_path() {
        assert_eq!(
            file_uri("objstore://tsbx/sessions/abc/", "out.txt"),
            "objstore://tsbx/sessions/abc/out.txt"
        );
    }

    #[test]
    fn strips_a_leading_slash_on_the_relative_path() {
        assert_eq!(
            file_uri("objstore://tsbx/sessions/abc/", "/nested/out.txt"),
            "objstore://tsbx/sessions/abc/nested/out.txt"
        );
    }
}
