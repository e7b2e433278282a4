use sqlx::MySqlPool;

use crate::domain::Execution;

use super::{map_sqlx_err, RepoError, RepoResult};

const SELECT_COLUMNS: &str = r#"
    id, session_id, code, language, timeout_secs, event, status, exit_code,
    stdout, stderr, return_value, duration_ms, cpu_time_ms, memory_peak_mb,
    retry_count, last_heartbeat_at, created_at, completed_at, error_detail
"#;

pub struct ExecutionRepo;

impl ExecutionRepo {
    pub async fn save(pool: &MySqlPool, e: &Execution) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                id, session_id, code, language, timeout_secs, event, status, exit_code,
                stdout, stderr, return_value, duration_ms, cpu_time_ms, memory_peak_mb,
                retry_count, last_heartbeat_at, created_at, completed_at, error_detail
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                exit_code = VALUES(exit_code),
                stdout = VALUES(stdout),
                stderr = VALUES(stderr),
                return_value = VALUES(return_value),
                duration_ms = VALUES(duration_ms),
                cpu_time_ms = VALUES(cpu_time_ms),
                memory_peak_mb = VALUES(memory_peak_mb),
                retry_count = VALUES(retry_count),
                last_heartbeat_at = VALUES(last_heartbeat_at),
                completed_at = VALUES(completed_at),
                error_detail = VALUES(error_detail)
            "#,
        )
        .bind(&e.id)
        .bind(&e.session_id)
        .bind(&e.code)
        .bind(&e.language)
        .bind(e.timeout_secs)
        .bind(&e.event)
        .bind(&e.status)
        .bind(e.exit_code)
        .bind(&e.stdout)
        .bind(&e.stderr)
        .bind(&e.return_value)
        .bind(e.duration_ms)
        .bind(e.cpu_time_ms)
        .bind(e.memory_peak_mb)
        .bind(e.retry_count)
        .bind(e.last_heartbeat_at)
        .bind(e.created_at)
        .bind(e.completed_at)
        .bind(&e.error_detail)
        .execute(pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn find_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Option<Execution>> {
        sqlx::query_as::<_, Execution>(&format!(
            "SELECT {SELECT_COLUMNS} FROM executions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn require_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Execution> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("execution {id} not found")))
    }

    pub async fn list_by_session(
        pool: &MySqlPool,
        session_id: &str,
        limit: i64,
    ) -> RepoResult<Vec<Execution>> {
        sqlx::query_as::<_, Execution>(&format!(
            "SELECT {SELECT_COLUMNS} FROM executions \
             WHERE session_id = ? ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn find_by_status(pool: &MySqlPool, status: &str) -> RepoResult<Vec<Execution>> {
        sqlx::query_as::<_, Execution>(&format!(
            "SELECT {SELECT_COLUMNS} FROM executions WHERE status = ?"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn count(pool: &MySqlPool, session_id: &str) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM executions WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(pool)
            .await
            .map_err(map_sqlx_err)
    }

    pub async fn delete(pool: &MySqlPool, id: &str) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM executions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(res.rows_affected() > 0)
    }
}
