use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

use crate::api::state::AppState;
use crate::error::ApiError;

/// The internal callback surface has no per-subject identity, only a single
/// bearer token shared with the executor (spec.md §4.I / §6) -- the same
/// Authorization-header convention the rest of this codebase uses for JWTs,
/// checked against one configured secret instead of decoded.
pub async fn callback_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::ValidationError("missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::ValidationError("expected a bearer token".to_string()))?;

    if token != state.callback_shared_token {
        return Err(ApiError::ValidationError("invalid callback token".to_string()));
    }

    info!(path = %request.uri().path(), "internal callback request");
    Ok(next.run(request).await)
}
