use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::error::ApiResult;
use crate::repo::SessionRepo;
use crate::scheduler::ContainerRunState;

#[derive(Debug, Serialize)]
pub struct ContainerSummary {
    pub container_id: String,
    pub session_id: String,
    pub session_status: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListContainersQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Read-only monitoring: containers are not their own entity, they're
/// derived from the sessions that own them (spec.md §6).
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListContainersQuery>,
) -> ApiResult<Json<Vec<ContainerSummary>>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    let sessions = SessionRepo::list(&state.pool, None, None, limit, offset).await?;
    let out = sessions
        .into_iter()
        .filter_map(|s| {
            s.container_id.clone().map(|container_id| ContainerSummary {
                container_id,
                session_id: s.id,
                session_status: s.status,
            })
        })
        .collect();
    Ok(Json(out))
}

#[derive(Debug, Serialize)]
pub struct ContainerDetail {
    pub status: &'static str,
    pub exit_code: Option<i32>,
    pub ip: Option<String>,
    pub image: String,
}

fn run_state_str(s: ContainerRunState) -> &'static str {
    match s {
        ContainerRunState::Created => "created",
        ContainerRunState::Running => "running",
        ContainerRunState::Exited => "exited",
        ContainerRunState::Unknown => "unknown",
    }
}

pub async fn get_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ContainerDetail>> {
    let info = state.scheduler.inspect(&id).await?;
    Ok(Json(ContainerDetail {
        status: run_state_str(info.status),
        exit_code: info.exit_code,
        ip: info.ip,
        image: info.image,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: String,
}

pub async fn container_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let tail = q.tail.unwrap_or(200);
    let logs = state.scheduler.logs(&id, tail).await?;
    Ok(Json(LogsResponse { logs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_str_covers_every_variant() {
        assert_eq!(run_state_str(ContainerRunState::Created), "created");
        assert_eq!(run_state_str(ContainerRunState::Running), "running");
        assert_eq!(run_state_str(ContainerRunState::Exited), "exited");
        assert_eq!(run_state_str(ContainerRunState::Unknown), "unknown");
    }
}
