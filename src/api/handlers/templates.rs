use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::domain::Template;
use crate::error::{ApiError, ApiResult};
use crate::repo::TemplateRepo;

fn default_cpu() -> String {
    "1".to_string()
}
fn default_memory() -> String {
    "512Mi".to_string()
}
fn default_disk() -> String {
    "1Gi".to_string()
}
fn default_timeout_secs() -> i32 {
    300
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateBody {
    pub name: String,
    pub image: String,
    #[serde(default = "default_cpu")]
    pub default_cpu: String,
    #[serde(default = "default_memory")]
    pub default_memory: String,
    #[serde(default = "default_disk")]
    pub default_disk: String,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: i32,
    #[serde(default)]
    pub preinstalled_packages: serde_json::Value,
    #[serde(default)]
    pub security_context: serde_json::Value,
}

/// Names are unique among non-deleted templates (spec.md §6); the check
/// and the insert are not atomic here, so a uniqueness race still falls
/// through to the repo's `23000`/`1062` mapping to `ConflictError`.
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTemplateBody>,
) -> ApiResult<Json<Template>> {
    if TemplateRepo::find_by_name(&state.pool, &body.name).await?.is_some() {
        return Err(ApiError::ConflictError(format!("template name '{}' already exists", body.name)));
    }

    let now = Utc::now();
    let template = Template {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        image: body.image,
        default_cpu: body.default_cpu,
        default_memory: body.default_memory,
        default_disk: body.default_disk,
        default_timeout_secs: body.default_timeout_secs,
        preinstalled_packages: body.preinstalled_packages,
        security_context: body.security_context,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    TemplateRepo::create(&state.pool, &template).await?;
    Ok(Json(template))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListTemplatesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListTemplatesQuery>,
) -> ApiResult<Json<Vec<Template>>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    Ok(Json(TemplateRepo::list(&state.pool, limit, offset).await?))
}

pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(TemplateRepo::require_by_id(&state.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateBody {
    pub image: Option<String>,
    pub default_cpu: Option<String>,
    pub default_memory: Option<String>,
    pub default_disk: Option<String>,
    pub default_timeout_secs: Option<i32>,
    pub preinstalled_packages: Option<serde_json::Value>,
    pub security_context: Option<serde_json::Value>,
}

pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTemplateBody>,
) -> ApiResult<Json<Template>> {
    let mut template = TemplateRepo::require_by_id(&state.pool, &id).await?;
    if let Some(v) = body.image {
        template.image = v;
    }
    if let Some(v) = body.default_cpu {
        template.default_cpu = v;
    }
    if let Some(v) = body.default_memory {
        template.default_memory = v;
    }
    if let Some(v) = body.default_disk {
        template.default_disk = v;
    }
    if let Some(v) = body.default_timeout_secs {
        template.default_timeout_secs = v;
    }
    if let Some(v) = body.preinstalled_packages {
        template.preinstalled_packages = v;
    }
    if let Some(v) = body.security_context {
        template.security_context = v;
    }
    template.updated_at = Utc::now();
    TemplateRepo::update(&state.pool, &template).await?;
    Ok(Json(template))
}

pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = TemplateRepo::soft_delete(&state.pool, &id, Utc::now()).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("template {id} not found")));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
