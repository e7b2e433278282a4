use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::api::state::AppState;
use crate::domain::SessionStatus;
use crate::error::ApiResult;
use crate::repo::SessionRepo;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub active_sessions: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let active = SessionRepo::find_by_statuses(
        &state.pool,
        &[SessionStatus::Creating.as_str(), SessionStatus::Running.as_str()],
    )
    .await?
    .len() as i64;

    Ok(Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        active_sessions: active,
    }))
}
