use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::state::AppState;
use crate::domain::Session;
use crate::error::ApiResult;
use crate::session_service::CreateSessionRequest;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub template_id: String,
    pub timeout: Option<i32>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub disk: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub install_timeout: Option<i32>,
    #[serde(default)]
    pub fail_on_dependency_error: bool,
    #[serde(default = "default_true")]
    pub wait_for_ready: bool,
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Json<Session>> {
    let req = CreateSessionRequest {
        template_id: body.template_id,
        timeout_secs: body.timeout,
        cpu_limit: body.cpu,
        memory_limit: body.memory,
        disk_limit: body.disk,
        env_vars: body.env_vars,
        dependencies: body.dependencies,
        install_timeout_secs: body.install_timeout,
        fail_on_dependency_error: body.fail_on_dependency_error,
        wait_for_ready: body.wait_for_ready,
    };
    let session = state.sessions.create_session(req).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
    pub template_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    let sessions = state
        .sessions
        .list_sessions(q.status.as_deref(), q.template_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.sessions.get_session(&id).await?))
}

/// DELETE = terminate. Idempotent: terminating an already-terminal
/// session just returns its current state.
pub async fn terminate_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.sessions.terminate_session(&id).await?))
}
