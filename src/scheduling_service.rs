use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{RuntimeNode, Session, Template};
use crate::repo::RuntimeNodeRepo;
use crate::scheduler::{ContainerConfig, ContainerScheduler, SchedulerResult};

pub struct ScheduleRequest<'a> {
    pub template: &'a Template,
    pub cpu_limit: &'a str,
    pub memory_limit: &'a str,
    pub preferred_labels: HashMap<String, String>,
}

/// Node selection and container construction. RuntimeNode counters are only
/// ever mutated inside `select_node`'s critical section (the node mutex),
/// keeping `allocated <= total` true even under concurrent scheduling.
pub struct SchedulingService {
    pool: sqlx::MySqlPool,
    scheduler: Arc<dyn ContainerScheduler>,
    node_mutex: tokio::sync::Mutex<()>,
    control_plane_url: String,
}

impl SchedulingService {
    pub fn new(pool: sqlx::MySqlPool, scheduler: Arc<dyn ContainerScheduler>, control_plane_url: String) -> Self {
        Self {
            pool,
            scheduler,
            node_mutex: tokio::sync::Mutex::new(()),
            control_plane_url,
        }
    }

    fn parse_cpu(cpu: &str) -> f64 {
        cpu.trim().parse().unwrap_or(1.0)
    }

    fn parse_memory_mb(memory: &str) -> i64 {
        let s = memory.trim();
        if let Some(n) = s.strip_suffix("Gi") {
            (n.trim().parse::<f64>().unwrap_or(0.5) * 1024.0) as i64
        } else if let Some(n) = s.strip_suffix("Mi") {
            n.trim().parse::<f64>().unwrap_or(512.0) as i64
        } else {
            s.parse::<f64>().unwrap_or(512.0) as i64
        }
    }

    /// Selects a healthy, capacity-having node, tie-breaking on lowest
    /// combined cpu+memory utilization, and reserves capacity for it under
    /// the node mutex. The cluster variant degenerates to a single logical
    /// node row, so this still applies uniformly.
    pub async fn select_node(&self, req: &ScheduleRequest<'_>) -> anyhow::Result<RuntimeNode> {
        let cpu = Self::parse_cpu(req.cpu_limit);
        let memory_mb = Self::parse_memory_mb(req.memory_limit);

        let _guard = self.node_mutex.lock().await;

        let candidates = RuntimeNodeRepo::list_online(&self.pool).await?;
        let mut best: Option<RuntimeNode> = None;
        for node in candidates {
            if !node.has_capacity(cpu, memory_mb) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    let node_caches = node.caches_image(&req.template.image);
                    let current_caches = current.caches_image(&req.template.image);
                    match (node_caches, current_caches) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => node.utilization() < current.utilization(),
                    }
                }
            };
            if better {
                best = Some(node);
            }
        }

        let mut node = match best {
            Some(n) => n,
            None => anyhow::bail!("resource_exhausted: no healthy node has capacity"),
        };

        node.allocated_cpu += cpu;
        node.allocated_memory_mb += memory_mb;
        node.container_count += 1;
        node.updated_at = Utc::now();
        RuntimeNodeRepo::save(&self.pool, &node).await?;

        Ok(node)
    }

    /// Releases the capacity a session reserved, parsing its own
    /// `cpu_limit`/`memory_limit` strings. A no-op if the session was never
    /// scheduled onto a node.
    pub async fn release_for_session(&self, session: &Session) -> anyhow::Result<()> {
        let Some(node_id) = session.runtime_node_id.as_deref() else {
            return Ok(());
        };
        let cpu = Self::parse_cpu(&session.cpu_limit);
        let memory_mb = Self::parse_memory_mb(&session.memory_limit);
        self.release_node_capacity(node_id, cpu, memory_mb).await
    }

    pub async fn release_node_capacity(&self, node_id: &str, cpu: f64, memory_mb: i64) -> anyhow::Result<()> {
        let _guard = self.node_mutex.lock().await;
        if let Some(mut node) = RuntimeNodeRepo::find_by_id(&self.pool, node_id).await? {
            node.allocated_cpu = (node.allocated_cpu - cpu).max(0.0);
            node.allocated_memory_mb = (node.allocated_memory_mb - memory_mb).max(0);
            node.container_count = (node.container_count - 1).max(0);
            node.updated_at = Utc::now();
            RuntimeNodeRepo::save(&self.pool, &node).await?;
        }
        Ok(())
    }

    /// Builds the `ContainerConfig` for a session, wrapping the entrypoint
    /// with a dependency-install step when dependencies were requested.
    pub fn build_container_config(
        &self,
        session: &Session,
        template: &Template,
        node: &RuntimeNode,
    ) -> ContainerConfig {
        let mut env_vars: HashMap<String, String> = session
            .env_vars
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        env_vars.insert("SESSION_ID".to_string(), session.id.clone());
        env_vars.insert("WORKSPACE_PATH".to_string(), session.workspace_uri.clone());
        env_vars.insert("CONTROL_PLANE_URL".to_string(), self.control_plane_url.clone());

        if session.has_dependencies() {
            let deps: Vec<String> = session
                .requested_dependencies
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            env_vars.insert("TSBX_DEPENDENCIES".to_string(), deps.join(" "));
            env_vars.insert(
                "TSBX_DEPENDENCY_INSTALL_DIR".to_string(),
                "/opt/sandbox-venv".to_string(),
            );
        }

        let mut labels = HashMap::new();
        labels.insert("session_id".to_string(), session.id.clone());
        labels.insert("template_id".to_string(), template.id.clone());

        ContainerConfig {
            image: template.image.clone(),
            name: session.id.clone(),
            env_vars,
            cpu_limit: session.cpu_limit.clone(),
            memory_limit: session.memory_limit.clone(),
            disk_limit: session.disk_limit.clone(),
            workspace_uri: session.workspace_uri.clone(),
            labels,
            network: if node.node_type == "local" { None } else { Some("tsbx".to_string()) },
        }
    }

    pub async fn destroy(&self, container_id: &str) -> SchedulerResult<()> {
        info!("destroying container {container_id}");
        self.scheduler.stop(container_id, 10).await?;
        self.scheduler.remove(container_id, true).await?;
        Ok(())
    }
}

/// Idempotent node bootstrap for the controller binary's startup: a fresh
/// deployment has no `runtime_nodes` rows, and `select_node` only ever
/// reads existing ones. Leaves an existing row's counters untouched so a
/// restart doesn't reset `allocated_cpu`/`allocated_memory_mb` out from
/// under live sessions.
pub async fn ensure_local_node(
    pool: &sqlx::MySqlPool,
    hostname: &str,
    node_type: &str,
    endpoint: &str,
    total_cpu: f64,
    total_memory_mb: i64,
    max_containers: i32,
) -> anyhow::Result<RuntimeNode> {
    if let Some(existing) = RuntimeNodeRepo::find_by_hostname(pool, hostname).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let node = RuntimeNode {
        id: uuid::Uuid::new_v4().to_string(),
        hostname: hostname.to_string(),
        node_type: node_type.to_string(),
        endpoint: endpoint.to_string(),
        status: crate::domain::NodeStatus::Online.as_str().to_string(),
        total_cpu,
        total_memory_mb,
        allocated_cpu: 0.0,
        allocated_memory_mb: 0,
        container_count: 0,
        max_containers,
        cached_images: serde_json::json!([]),
        last_heartbeat_at: now,
        created_at: now,
        updated_at: now,
    };
    RuntimeNodeRepo::save(pool, &node).await?;
    Ok(node)
}

/// Periodic cadence distinct from state-sync's per-session reconciliation:
/// pings the container runtime directly and reflects its reachability onto
/// the local `RuntimeNode` row (status + `last_heartbeat_at`), so a node
/// whose Docker daemon/cluster endpoint has gone away stops being selected
/// by `select_node` even before any session on it is touched.
pub async fn refresh_node_health(
    pool: &sqlx::MySqlPool,
    scheduler: &Arc<dyn ContainerScheduler>,
    hostname: &str,
) -> anyhow::Result<()> {
    let Some(mut node) = RuntimeNodeRepo::find_by_hostname(pool, hostname).await? else {
        warn!(hostname, "scheduler health refresh: no runtime_node row for this host");
        return Ok(());
    };

    let now = Utc::now();
    match scheduler.ping().await {
        Ok(()) => {
            node.status = crate::domain::NodeStatus::Online.as_str().to_string();
            node.last_heartbeat_at = now;
        }
        Err(e) => {
            warn!(hostname, "scheduler health refresh: ping failed: {e}");
            node.status = crate::domain::NodeStatus::Offline.as_str().to_string();
        }
    }
    node.updated_at = now;
    RuntimeNodeRepo::save(pool, &node).await?;
    Ok(())
}

/// If container creation fails partway through, the partially-created
/// container (if any) is removed and the error propagated to the caller.
pub async fn create_and_start_or_rollback(
    scheduler: &Arc<dyn ContainerScheduler>,
    cfg: &ContainerConfig,
) -> anyhow::Result<String> {
    let container_id = scheduler.create(cfg).await?;
    if let Err(e) = scheduler.start(&container_id).await {
        warn!("start failed for {container_id}, rolling back: {e}");
        let _ = scheduler.remove(&container_id, true).await;
        return Err(e.into());
    }
    Ok(container_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpu_accepts_plain_numbers() {
        assert_eq!(SchedulingService::parse_cpu("2"), 2.0);
        assert_eq!(SchedulingService::parse_cpu(" 0.5 "), 0.5);
    }

    #[test]
    fn parse_cpu_falls_back_on_garbage() {
        assert_eq!(SchedulingService::parse_cpu("not-a-number"), 1.0);
    }

    #[test]
    fn parse_memory_mb_handles_gi_and_mi_suffixes() {
        assert_eq!(SchedulingService::parse_memory_mb("2Gi"), 2048);
        assert_eq!(SchedulingService::parse_memory_mb("512Mi"), 512);
    }

    #[test]
    fn parse_memory_mb_treats_bare_number_as_mb() {
        assert_eq!(SchedulingService::parse_memory_mb("256"), 256);
    }
}
