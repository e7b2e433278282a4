use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use crate::domain::Session;

use super::{map_sqlx_err, RepoError, RepoResult};

const SELECT_COLUMNS: &str = r#"
    id, template_id, status, cpu_limit, memory_limit, disk_limit, max_processes,
    workspace_uri, runtime_type, runtime_node_id, container_id, executor_port,
    env_vars, timeout_secs, created_at, updated_at, last_activity_at, completed_at,
    requested_dependencies, installed_dependencies, dependency_install_status,
    dependency_install_error, fail_reason
"#;

/// Pure persistence adapter over the `sessions` table. Business rules (legal
/// status transitions, idle/expiry thresholds) live in the domain and service
/// layers, not here.
pub struct SessionRepo;

impl SessionRepo {
    pub async fn save(pool: &MySqlPool, s: &Session) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, template_id, status, cpu_limit, memory_limit, disk_limit, max_processes,
                workspace_uri, runtime_type, runtime_node_id, container_id, executor_port,
                env_vars, timeout_secs, created_at, updated_at, last_activity_at, completed_at,
                requested_dependencies, installed_dependencies, dependency_install_status,
                dependency_install_error, fail_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                runtime_node_id = VALUES(runtime_node_id),
                container_id = VALUES(container_id),
                executor_port = VALUES(executor_port),
                updated_at = VALUES(updated_at),
                last_activity_at = VALUES(last_activity_at),
                completed_at = VALUES(completed_at),
                installed_dependencies = VALUES(installed_dependencies),
                dependency_install_status = VALUES(dependency_install_status),
                dependency_install_error = VALUES(dependency_install_error),
                fail_reason = VALUES(fail_reason)
            "#,
        )
        .bind(&s.id)
        .bind(&s.template_id)
        .bind(&s.status)
        .bind(&s.cpu_limit)
        .bind(&s.memory_limit)
        .bind(&s.disk_limit)
        .bind(s.max_processes)
        .bind(&s.workspace_uri)
        .bind(&s.runtime_type)
        .bind(&s.runtime_node_id)
        .bind(&s.container_id)
        .bind(s.executor_port)
        .bind(&s.env_vars)
        .bind(s.timeout_secs)
        .bind(s.created_at)
        .bind(s.updated_at)
        .bind(s.last_activity_at)
        .bind(s.completed_at)
        .bind(&s.requested_dependencies)
        .bind(&s.installed_dependencies)
        .bind(&s.dependency_install_status)
        .bind(&s.dependency_install_error)
        .bind(&s.fail_reason)
        .execute(pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn find_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Option<Session>> {
        let row = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(row)
    }

    pub async fn require_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Session> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("session {id} not found")))
    }

    pub async fn find_by_status(pool: &MySqlPool, status: &str) -> RepoResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions WHERE status = ? ORDER BY created_at DESC"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn find_by_statuses(pool: &MySqlPool, statuses: &[&str]) -> RepoResult<Vec<Session>> {
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sessions WHERE status IN ({placeholders}) ORDER BY created_at DESC"
        );
        let mut q = sqlx::query_as::<_, Session>(&sql);
        for s in statuses {
            q = q.bind(*s);
        }
        q.fetch_all(pool).await.map_err(map_sqlx_err)
    }

    pub async fn find_idle(
        pool: &MySqlPool,
        activity_before: DateTime<Utc>,
    ) -> RepoResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions \
             WHERE status IN ('CREATING', 'RUNNING') AND last_activity_at < ?"
        ))
        .bind(activity_before)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn find_expired(
        pool: &MySqlPool,
        created_before: DateTime<Utc>,
    ) -> RepoResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions \
             WHERE status IN ('CREATING', 'RUNNING') AND created_at < ?"
        ))
        .bind(created_before)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn find_stuck_creating(
        pool: &MySqlPool,
        created_before: DateTime<Utc>,
    ) -> RepoResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions WHERE status = 'CREATING' AND created_at < ?"
        ))
        .bind(created_before)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn find_orphan_candidates(pool: &MySqlPool) -> RepoResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions \
             WHERE status IN ('FAILED', 'TIMEOUT') AND container_id IS NOT NULL"
        ))
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn list(
        pool: &MySqlPool,
        status: Option<&str>,
        template_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> RepoResult<Vec<Session>> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SELECT_COLUMNS} FROM sessions \
             WHERE (? IS NULL OR status = ?) AND (? IS NULL OR template_id = ?) \
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(status)
        .bind(template_id)
        .bind(template_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn count(pool: &MySqlPool, status: Option<&str>) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sessions WHERE (? IS NULL OR status = ?)",
        )
        .bind(status)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn delete(pool: &MySqlPool, id: &str) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_columns_cover_every_session_field() {
        for field in [
            "id", "template_id", "status", "workspace_uri", "fail_reason",
            "dependency_install_status",
        ] {
            assert!(SELECT_COLUMNS.contains(field), "missing column: {field}");
        }
    }
}
