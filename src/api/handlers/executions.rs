use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::state::AppState;
use crate::domain::Execution;
use crate::error::ApiResult;
use crate::session_service::ExecuteRequestInput;

fn default_timeout_secs() -> i32 {
    300
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub code: String,
    pub language: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout: i32,
    #[serde(default)]
    pub event: serde_json::Value,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

pub async fn execute(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<Json<Execution>> {
    let req = ExecuteRequestInput {
        code: body.code,
        language: body.language,
        timeout_secs: body.timeout,
        event: body.event,
        env_vars: body.env_vars,
    };
    Ok(Json(state.sessions.execute(&session_id, req).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListExecutionsQuery {
    pub limit: Option<i64>,
}

pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(q): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Vec<Execution>>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(state.sessions.list_executions(&session_id, limit).await?))
}

pub async fn get_execution_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let execution = state.sessions.get_execution(&id).await?;
    Ok(Json(serde_json::json!({
        "execution_id": execution.id,
        "status": execution.status,
    })))
}

pub async fn get_execution_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Execution>> {
    Ok(Json(state.sessions.get_execution(&id).await?))
}
