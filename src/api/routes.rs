use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::middleware::callback_auth_middleware;
use crate::api::state::AppState;

/// Client-facing routes carry no auth (spec.md's Non-goals explicitly
/// exclude a multi-tenant authorization model); the internal callback
/// routes are layered with the shared-token middleware below.
pub fn create_router(state: Arc<AppState>) -> Router {
    let client_routes = Router::new()
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions", get(handlers::sessions::list_sessions))
        .route("/sessions/{id}", get(handlers::sessions::get_session))
        .route("/sessions/{id}", delete(handlers::sessions::terminate_session))
        .route("/sessions/{id}/executions/execute", post(handlers::executions::execute))
        .route("/sessions/{id}/executions", get(handlers::executions::list_executions))
        .route(
            "/sessions/{session_id}/files/{*rel_path}",
            post(handlers::files::upload_file),
        )
        .route(
            "/sessions/{session_id}/files/{*rel_path}",
            get(handlers::files::download_file),
        )
        .route(
            "/sessions/{session_id}/files/{*rel_path}",
            delete(handlers::files::delete_file),
        )
        .route("/sessions/{session_id}/files", get(handlers::files::list_files))
        .route("/executions/{id}/status", get(handlers::executions::get_execution_status))
        .route("/executions/{id}/result", get(handlers::executions::get_execution_result))
        .route("/templates", post(handlers::templates::create_template))
        .route("/templates", get(handlers::templates::list_templates))
        .route("/templates/{id}", get(handlers::templates::get_template))
        .route("/templates/{id}", put(handlers::templates::update_template))
        .route("/templates/{id}", delete(handlers::templates::delete_template))
        .route("/containers", get(handlers::containers::list_containers))
        .route("/containers/{id}", get(handlers::containers::get_container))
        .route("/containers/{id}/logs", get(handlers::containers::container_logs))
        .route("/health", get(handlers::health::health));

    let internal_routes = Router::new()
        .route(
            "/internal/sessions/{id}/container_ready",
            post(handlers::callbacks::container_ready),
        )
        .route(
            "/internal/sessions/{id}/container_exited",
            post(handlers::callbacks::container_exited),
        )
        .route(
            "/internal/executions/{id}/result",
            post(handlers::callbacks::execution_result),
        )
        .route(
            "/internal/executions/{id}/heartbeat",
            post(handlers::callbacks::execution_heartbeat),
        )
        .layer(middleware::from_fn_with_state(state.clone(), callback_auth_middleware));

    let api_routes = client_routes.merge(internal_routes).with_state(state);

    Router::new().nest("/api/v0", api_routes).layer(TraceLayer::new_for_http())
}
