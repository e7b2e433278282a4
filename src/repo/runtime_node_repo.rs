use sqlx::MySqlPool;

use crate::domain::RuntimeNode;

use super::{map_sqlx_err, RepoError, RepoResult};

const SELECT_COLUMNS: &str = r#"
    id, hostname, node_type, endpoint, status, total_cpu, total_memory_mb,
    allocated_cpu, allocated_memory_mb, container_count, max_containers,
    cached_images, last_heartbeat_at, created_at, updated_at
"#;

pub struct RuntimeNodeRepo;

impl RuntimeNodeRepo {
    pub async fn save(pool: &MySqlPool, n: &RuntimeNode) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runtime_nodes (
                id, hostname, node_type, endpoint, status, total_cpu, total_memory_mb,
                allocated_cpu, allocated_memory_mb, container_count, max_containers,
                cached_images, last_heartbeat_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                allocated_cpu = VALUES(allocated_cpu),
                allocated_memory_mb = VALUES(allocated_memory_mb),
                container_count = VALUES(container_count),
                cached_images = VALUES(cached_images),
                last_heartbeat_at = VALUES(last_heartbeat_at),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(&n.id)
        .bind(&n.hostname)
        .bind(&n.node_type)
        .bind(&n.endpoint)
        .bind(&n.status)
        .bind(n.total_cpu)
        .bind(n.total_memory_mb)
        .bind(n.allocated_cpu)
        .bind(n.allocated_memory_mb)
        .bind(n.container_count)
        .bind(n.max_containers)
        .bind(&n.cached_images)
        .bind(n.last_heartbeat_at)
        .bind(n.created_at)
        .bind(n.updated_at)
        .execute(pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn find_by_id(pool: &MySqlPool, id: &str) -> RepoResult<Option<RuntimeNode>> {
        sqlx::query_as::<_, RuntimeNode>(&format!(
            "SELECT {SELECT_COLUMNS} FROM runtime_nodes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn require_by_id(pool: &MySqlPool, id: &str) -> RepoResult<RuntimeNode> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("runtime node {id} not found")))
    }

    pub async fn find_by_hostname(pool: &MySqlPool, hostname: &str) -> RepoResult<Option<RuntimeNode>> {
        sqlx::query_as::<_, RuntimeNode>(&format!(
            "SELECT {SELECT_COLUMNS} FROM runtime_nodes WHERE hostname = ?"
        ))
        .bind(hostname)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn list_online(pool: &MySqlPool) -> RepoResult<Vec<RuntimeNode>> {
        sqlx::query_as::<_, RuntimeNode>(&format!(
            "SELECT {SELECT_COLUMNS} FROM runtime_nodes WHERE status = 'ONLINE'"
        ))
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn list(pool: &MySqlPool, limit: i64, offset: i64) -> RepoResult<Vec<RuntimeNode>> {
        sqlx::query_as::<_, RuntimeNode>(&format!(
            "SELECT {SELECT_COLUMNS} FROM runtime_nodes ORDER BY hostname LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_err)
    }

    pub async fn delete(pool: &MySqlPool, id: &str) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM runtime_nodes WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(res.rows_affected() > 0)
    }
}
