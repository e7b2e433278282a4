use sqlx::MySqlPool;

use crate::domain::Template;

use super::{map_sqlx_err, RepoError, RepoResult};

const SELECT_COLUMNS: &str = r#"
    id, name, image, default_cpu, default_memory, default_disk, default_timeout_secs,
    preinstalled_packages, security_context, created_at, updated_at, deleted_at
"#;

pub struct TemplateRepo;

impl TemplateRepo {
    pub async fn create(pool: &MySqlPool, t: &Template) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO templates (
                id, name, image, default_cpu, default_memory, default_disk,
                default_timeout_secs, preinstalled_packages, security_context,
                created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&t.id)
        .bind(&t.name)
        .bind(&t.image)
        .bind(&t.default_cpu)
        .bind(&t.default_memory)
        .bind(&t.default_disk)
        .bind(t.default_timeout_secs)
        .bind(&t.preinstalled_packages)
        .bind(&t.security_context)
        .bind(t.created_at)
        .bind(t.updated_at)
        .bind(t.deleted_at)
        .execute(pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn update(pool: &MySqlPool, t: &Template) -> RepoResult<()> {
        sqlx::query(
            r#"
            UPDATE templates SET
                name = ?, image = ?, default_cpu = ?, default_memory = ?, default_disk = ?,
                default_timeout_secs = ?, preinstalled_packages = ?, security_context = ?,
                updated_at = ?, deleted_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&t.name)
        .bind(&t.image)
        .bind(&t.default_cpu)
        .bind(&t.default_memory)
        .bind(&t.default_disk)
        .bind(t.default_timeout_secs)
        .bind(&t.preinstalled_packages)
        .bind(&t.security_context)
        .bind(t.updated_at)
        .bind(t.deleted_at)
        .bind(&t.id)
        .execute(pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn find_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Option<Template>> {
        sqlx::query_as::<_, Template>(&format!(
            "SELECT {SELECT_COLUMNS} FROM templates WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn require_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Template> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("template {id} not found")))
    }

    pub async fn find_by_name(pool: &MySqlPool, name: &str) -> RepoResult<Option<Template>> {
        sqlx::query_as::<_, Template>(&format!(
            "SELECT {SELECT_COLUMNS} FROM templates WHERE name = ? AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn list(pool: &MySqlPool, limit: i64, offset: i64) -> RepoResult<Vec<Template>> {
        sqlx::query_as::<_, Template>(&format!(
            "SELECT {SELECT_COLUMNS} FROM templates \
             WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn soft_delete(pool: &MySqlPool, id: &str, now: chrono::DateTime<chrono::Utc>) -> RepoResult<bool> {
        let res = sqlx::query("UPDATE templates SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(res.rows_affected() > 0)
    }
}
