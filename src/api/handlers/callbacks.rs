use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::api::state::AppState;
use crate::callback::{CallbackAck, ContainerExitedPayload, ContainerReadyPayload, ExecutionResultPayload};
use crate::error::{ApiError, ApiResult};

/// Each handler trusts the path segment over the body's own id field, so a
/// caller that got the two out of sync gets a clear validation error rather
/// than a silently misrouted callback.
fn require_matching_id(path_id: &str, body_id: &str, field: &str) -> ApiResult<()> {
    if path_id != body_id {
        return Err(ApiError::ValidationError(format!(
            "path id does not match body.{field} ({path_id} != {body_id})"
        )));
    }
    Ok(())
}

pub async fn container_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ContainerReadyPayload>,
) -> ApiResult<Json<CallbackAck>> {
    require_matching_id(&id, &payload.session_id, "session_id")?;
    Ok(Json(state.callbacks.container_ready(payload).await?))
}

pub async fn container_exited(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ContainerExitedPayload>,
) -> ApiResult<Json<CallbackAck>> {
    require_matching_id(&id, &payload.session_id, "session_id")?;
    Ok(Json(state.callbacks.container_exited(payload).await?))
}

pub async fn execution_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ExecutionResultPayload>,
) -> ApiResult<Json<CallbackAck>> {
    require_matching_id(&id, &payload.execution_id, "execution_id")?;
    Ok(Json(state.callbacks.execution_result(payload).await?))
}

pub async fn execution_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CallbackAck>> {
    Ok(Json(state.callbacks.execution_heartbeat(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_ids_pass() {
        assert!(require_matching_id("abc", "abc", "session_id").is_ok());
    }

    #[test]
    fn mismatched_ids_are_rejected() {
        let err = require_matching_id("abc", "def", "session_id").unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }
}
