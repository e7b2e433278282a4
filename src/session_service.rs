use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{DependencyInstallStatus, Execution, Session, SessionStatus};
use crate::executor_client::{ExecuteRequest, ExecutorClient, ExecutorError};
use crate::objstore::ObjectStore;
use crate::repo::{ExecutionRepo, RepoError, SessionRepo, TemplateRepo};
use crate::scheduler::{ContainerConfig, ContainerScheduler, ContainerRunState};
use crate::scheduling_service::{create_and_start_or_rollback, ScheduleRequest, SchedulingService};
use crate::session_lock::SessionLocks;

pub struct CreateSessionRequest {
    pub template_id: String,
    pub timeout_secs: Option<i32>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub disk_limit: Option<String>,
    pub env_vars: HashMap<String, String>,
    pub dependencies: Vec<String>,
    pub install_timeout_secs: Option<i32>,
    pub fail_on_dependency_error: bool,
    pub wait_for_ready: bool,
}

pub struct ExecuteRequestInput {
    pub code: String,
    pub language: String,
    pub timeout_secs: i32,
    pub event: serde_json::Value,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<RepoError> for ServiceError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(m) => ServiceError::NotFound(m),
            other => ServiceError::Internal(other.into()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<ServiceError> for crate::error::ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(m) => crate::error::ApiError::NotFound(m),
            ServiceError::ValidationError(m) => crate::error::ApiError::ValidationError(m),
            ServiceError::ResourceExhausted(m) => crate::error::ApiError::ResourceExhausted(m),
            ServiceError::Internal(e) => crate::error::ApiError::Internal(e),
        }
    }
}

const READY_POLL_DEADLINE_SECS: u64 = 30;
const READY_POLL_INTERVAL_MS: u64 = 500;

/// Resolves a requested execution timeout against the service defaults:
/// falls back to `default` when unset, rejects non-positive values, and
/// clamps anything above `max` down to it. Pure so it's testable without
/// a `SessionService` instance.
fn clamp_timeout_value(requested: Option<i32>, default: i32, max: i32) -> ServiceResult<i32> {
    let value = requested.unwrap_or(default);
    if value <= 0 {
        return Err(ServiceError::ValidationError("timeout must be a positive number of seconds".to_string()));
    }
    Ok(value.min(max))
}

/// The central use-case orchestrator: creates sessions, dispatches
/// executions, and enforces every state-machine transition. The only
/// component allowed to write Session/Execution status besides the
/// background services in `state_sync`/`cleanup`/`callback`.
pub struct SessionService {
    pool: sqlx::MySqlPool,
    scheduler: Arc<dyn ContainerScheduler>,
    scheduling: Arc<SchedulingService>,
    executor: Arc<ExecutorClient>,
    objstore: Arc<dyn ObjectStore>,
    locks: SessionLocks,
    objstore_bucket: String,
    executor_port: u16,
    default_timeout_secs: i32,
    max_timeout_secs: i32,
    default_cpu: String,
    default_memory: String,
    default_disk: String,
}

impl SessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: sqlx::MySqlPool,
        scheduler: Arc<dyn ContainerScheduler>,
        scheduling: Arc<SchedulingService>,
        executor: Arc<ExecutorClient>,
        objstore: Arc<dyn ObjectStore>,
        objstore_bucket: String,
        executor_port: u16,
        default_timeout_secs: i32,
        max_timeout_secs: i32,
        default_cpu: String,
        default_memory: String,
        default_disk: String,
    ) -> Self {
        Self {
            pool,
            scheduler,
            scheduling,
            executor,
            objstore,
            locks: SessionLocks::new(),
            objstore_bucket,
            executor_port,
            default_timeout_secs,
            max_timeout_secs,
            default_cpu,
            default_memory,
            default_disk,
        }
    }

    pub fn clamp_timeout(&self, requested: Option<i32>) -> ServiceResult<i32> {
        clamp_timeout_value(requested, self.default_timeout_secs, self.max_timeout_secs)
    }

    pub async fn create_session(&self, req: CreateSessionRequest) -> ServiceResult<Session> {
        let template = TemplateRepo::find_by_id(&self.pool, &req.template_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("template {} not found", req.template_id)))?;

        let timeout_secs = self.clamp_timeout(req.timeout_secs)?;
        let id = Uuid::new_v4().to_string();
        let workspace_uri = format!("objstore://{}/sessions/{}/", self.objstore_bucket, id);
        let now = Utc::now();

        let dependency_install_status = if req.dependencies.is_empty() {
            DependencyInstallStatus::Completed
        } else {
            DependencyInstallStatus::Pending
        };

        let mut env_vars = serde_json::Map::new();
        for (k, v) in &req.env_vars {
            env_vars.insert(k.clone(), serde_json::Value::String(v.clone()));
        }

        let mut session = Session {
            id: id.clone(),
            template_id: template.id.clone(),
            status: SessionStatus::Creating.as_str().to_string(),
            cpu_limit: req.cpu_limit.clone().unwrap_or_else(|| self.default_cpu.clone()),
            memory_limit: req.memory_limit.clone().unwrap_or_else(|| self.default_memory.clone()),
            disk_limit: req.disk_limit.clone().unwrap_or_else(|| self.default_disk.clone()),
            max_processes: 64,
            workspace_uri,
            runtime_type: "local".to_string(),
            runtime_node_id: None,
            container_id: None,
            executor_port: None,
            env_vars: serde_json::Value::Object(env_vars),
            timeout_secs,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            completed_at: None,
            requested_dependencies: serde_json::json!(req.dependencies),
            installed_dependencies: serde_json::json!([]),
            dependency_install_status: dependency_install_status.as_str().to_string(),
            dependency_install_error: None,
            fail_reason: None,
        };

        // Node selection happens before the session row is persisted: a
        // resource-exhausted session must never be written (per the
        // boundary behavior that no Session row exists when no node has capacity).
        let schedule_req = ScheduleRequest {
            template: &template,
            cpu_limit: &session.cpu_limit,
            memory_limit: &session.memory_limit,
            preferred_labels: HashMap::new(),
        };
        let node = self
            .scheduling
            .select_node(&schedule_req)
            .await
            .map_err(|e| ServiceError::ResourceExhausted(e.to_string()))?;

        session.runtime_type = node.node_type.clone();
        SessionRepo::save(&self.pool, &session).await?;

        let cfg: ContainerConfig = self.scheduling.build_container_config(&session, &template, &node);

        match create_and_start_or_rollback(&self.scheduler, &cfg).await {
            Ok(container_id) => {
                session.container_id = Some(container_id);
                session.runtime_node_id = Some(node.id.clone());
                session.updated_at = Utc::now();
                SessionRepo::save(&self.pool, &session).await?;
            }
            Err(e) => {
                error!(session_id = %session.id, "container creation failed: {e}");
                session.mark_as_failed(format!("container_create_failed: {e}"), Utc::now()).ok();
                SessionRepo::save(&self.pool, &session).await?;
                if let Err(release_err) = self.scheduling.release_for_session(&session).await {
                    warn!(session_id = %session.id, "failed to release node capacity after create failure: {release_err}");
                }
                return Err(ServiceError::Internal(e));
            }
        }

        if req.wait_for_ready {
            self.wait_until_ready(&mut session).await?;
        }

        Ok(session)
    }

    /// Bounded poll of the container's running state, standing in for the
    /// callback-driven readiness path when a caller wants a synchronous create.
    /// When dependencies were requested, readiness also requires
    /// `dependency_install_status == COMPLETED` (spec §4.F step 7 /
    /// glossary: install success is a precondition for Session -> RUNNING),
    /// mirroring the gate `container_ready` applies on the callback path.
    async fn wait_until_ready(&self, session: &mut Session) -> ServiceResult<()> {
        let container_id = session.container_id.clone().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("session has no container_id to wait on"))
        })?;
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(READY_POLL_DEADLINE_SECS);

        loop {
            match self.scheduler.is_running(&container_id).await {
                Ok(true) => break,
                Ok(false) if tokio::time::Instant::now() >= deadline => {
                    let _guard = self.locks.lock(&session.id).await;
                    session.mark_as_failed("container_not_ready_in_time", Utc::now()).ok();
                    SessionRepo::save(&self.pool, session).await?;
                    return Err(ServiceError::ValidationError("container did not become ready in time".into()));
                }
                Ok(false) => tokio::time::sleep(std::time::Duration::from_millis(READY_POLL_INTERVAL_MS)).await,
                Err(e) => return Err(ServiceError::Internal(e.into())),
            }
        }

        loop {
            let _guard = self.locks.lock(&session.id).await;
            let mut fresh = SessionRepo::require_by_id(&self.pool, &session.id).await?;

            if fresh.status() != SessionStatus::Creating {
                // The container_ready callback already transitioned this
                // session (to RUNNING or FAILED) ahead of our own poll.
                *session = fresh;
                return Ok(());
            }

            if fresh.has_dependencies() {
                let install_status: DependencyInstallStatus =
                    fresh.dependency_install_status.parse().map_err(ServiceError::Internal)?;
                match install_status {
                    DependencyInstallStatus::Failed => {
                        let reason = format!(
                            "dependency_install_failed: {}",
                            fresh.dependency_install_error.clone().unwrap_or_default()
                        );
                        fresh.mark_as_failed(reason, Utc::now()).map_err(ServiceError::Internal)?;
                        SessionRepo::save(&self.pool, &fresh).await?;
                        *session = fresh;
                        return Err(ServiceError::ValidationError("dependency install failed".into()));
                    }
                    DependencyInstallStatus::Completed => {}
                    DependencyInstallStatus::Pending | DependencyInstallStatus::Installing => {
                        drop(_guard);
                        if tokio::time::Instant::now() >= deadline {
                            fresh.mark_as_failed("dependency_install_not_completed_in_time", Utc::now()).ok();
                            SessionRepo::save(&self.pool, &fresh).await?;
                            *session = fresh;
                            return Err(ServiceError::ValidationError(
                                "dependency install did not complete in time".into(),
                            ));
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(READY_POLL_INTERVAL_MS)).await;
                        continue;
                    }
                }
            }

            fresh
                .mark_as_running(
                    fresh.runtime_node_id.clone().unwrap_or_default(),
                    fresh.container_id.clone().unwrap_or_default(),
                    Utc::now(),
                )
                .map_err(ServiceError::Internal)?;
            SessionRepo::save(&self.pool, &fresh).await?;
            *session = fresh;
            return Ok(());
        }
    }

    pub async fn execute(&self, session_id: &str, req: ExecuteRequestInput) -> ServiceResult<Execution> {
        let _guard = self.locks.lock(session_id).await;
        let session = SessionRepo::require_by_id(&self.pool, session_id).await?;
        if session.status() != SessionStatus::Running {
            return Err(ServiceError::ValidationError("session_not_running".to_string()));
        }

        let timeout_secs = self.clamp_timeout(Some(req.timeout_secs))?;
        let now = Utc::now();
        let mut execution = Execution {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            code: req.code,
            language: req.language,
            timeout_secs,
            event: req.event,
            status: crate::domain::execution::ExecutionStatus::Pending.as_str().to_string(),
            exit_code: None,
            stdout: None,
            stderr: None,
            return_value: None,
            duration_ms: None,
            cpu_time_ms: None,
            memory_peak_mb: None,
            retry_count: 0,
            last_heartbeat_at: None,
            created_at: now,
            completed_at: None,
            error_detail: None,
        };
        ExecutionRepo::save(&self.pool, &execution).await?;

        let executor_url = self.resolve_executor_url(&session).await?;

        let submit_req = ExecuteRequest {
            execution_id: execution.id.clone(),
            session_id: session_id.to_string(),
            code: execution.code.clone(),
            language: execution.language.clone(),
            event: execution.event.clone(),
            timeout: timeout_secs,
            env_vars: req.env_vars,
        };

        match self.executor.submit(&executor_url, &submit_req).await {
            Ok(_) => {
                execution.mark_running().map_err(ServiceError::Internal)?;
                ExecutionRepo::save(&self.pool, &execution).await?;

                let mut session = session;
                session.update_last_activity(Utc::now());
                SessionRepo::save(&self.pool, &session).await?;
            }
            Err(ExecutorError::Validation(reason)) => {
                execution
                    .mark_failed(reason, Utc::now())
                    .map_err(ServiceError::Internal)?;
                ExecutionRepo::save(&self.pool, &execution).await?;
            }
            Err(ExecutorError::Connection(_)) | Err(ExecutorError::Timeout(_)) => {
                // Do not kill the container here; the orphan/health-check
                // loops will reconcile it if it is genuinely gone.
                execution
                    .mark_failed("executor_unreachable", Utc::now())
                    .map_err(ServiceError::Internal)?;
                ExecutionRepo::save(&self.pool, &execution).await?;
            }
            Err(e) => {
                execution
                    .mark_failed(e.to_string(), Utc::now())
                    .map_err(ServiceError::Internal)?;
                ExecutionRepo::save(&self.pool, &execution).await?;
            }
        }

        Ok(execution)
    }

    async fn resolve_executor_url(&self, session: &Session) -> ServiceResult<String> {
        let container_id = session
            .container_id
            .as_ref()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("running session has no container_id")))?;
        let info = self
            .scheduler
            .inspect(container_id)
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;
        let ip = info
            .ip
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("container has no reachable ip")))?;
        let port = session.executor_port.unwrap_or(self.executor_port as i32);
        Ok(format!("http://{ip}:{port}"))
    }

    pub async fn get_execution(&self, id: &str) -> ServiceResult<Execution> {
        Ok(ExecutionRepo::require_by_id(&self.pool, id).await?)
    }

    pub async fn list_executions(&self, session_id: &str, limit: i64) -> ServiceResult<Vec<Execution>> {
        Ok(ExecutionRepo::list_by_session(&self.pool, session_id, limit).await?)
    }

    /// Idempotent: terminating an already-terminal session returns it
    /// unchanged, with no extra container-destroy or workspace-delete call.
    pub async fn terminate_session(&self, id: &str) -> ServiceResult<Session> {
        let _guard = self.locks.lock(id).await;
        let mut session = SessionRepo::require_by_id(&self.pool, id).await?;

        if session.status().is_terminal() {
            return Ok(session);
        }

        let container_id = session.container_id.clone();
        session.mark_as_terminated(Utc::now());
        SessionRepo::save(&self.pool, &session).await?;

        if let Some(container_id) = container_id {
            if let Err(e) = self.scheduling.destroy(&container_id).await {
                warn!(session_id = %id, "best-effort container destroy failed on terminate: {e}");
            }
        }
        if let Err(e) = self.scheduling.release_for_session(&session).await {
            warn!(session_id = %id, "best-effort node capacity release failed on terminate: {e}");
        }

        if let Err(e) = self.objstore.delete_prefix(&session.workspace_uri).await {
            warn!(session_id = %id, "best-effort workspace delete failed on terminate, orphan cleanup will retry: {e}");
        }

        info!(session_id = %id, "session terminated");
        Ok(session)
    }

    /// CREATING -> FAILED for a session that never became ready in time.
    /// Best-effort container destroy, same as `terminate_session`.
    pub async fn fail_stuck_creating(&self, id: &str, reason: &str) -> ServiceResult<()> {
        let _guard = self.locks.lock(id).await;
        let mut session = SessionRepo::require_by_id(&self.pool, id).await?;
        if session.status() != SessionStatus::Creating {
            return Ok(());
        }

        let container_id = session.container_id.clone();
        session.mark_as_failed(reason.to_string(), Utc::now()).map_err(ServiceError::Internal)?;
        SessionRepo::save(&self.pool, &session).await?;

        if let Some(container_id) = container_id {
            if let Err(e) = self.scheduling.destroy(&container_id).await {
                warn!(session_id = %id, "best-effort container destroy failed on stuck-creating cleanup: {e}");
            }
        }
        if let Err(e) = self.scheduling.release_for_session(&session).await {
            warn!(session_id = %id, "best-effort node capacity release failed on stuck-creating cleanup: {e}");
        }
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        status: Option<&str>,
        template_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<Session>> {
        Ok(SessionRepo::list(&self.pool, status, template_id, limit, offset).await?)
    }

    pub async fn get_session(&self, id: &str) -> ServiceResult<Session> {
        Ok(SessionRepo::require_by_id(&self.pool, id).await?)
    }

    pub fn container_scheduler(&self) -> &Arc<dyn ContainerScheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &sqlx::MySqlPool {
        &self.pool
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }
}

/// Helper used by the health-check/state-sync services to classify whether a
/// container's runtime-level state still matches RUNNING.
pub fn is_container_alive(state: ContainerRunState) -> bool {
    state == ContainerRunState::Running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rejects_non_positive_timeouts() {
        assert!(clamp_timeout_value(Some(0), 300, 3600).is_err());
        assert!(clamp_timeout_value(Some(-5), 300, 3600).is_err());
    }

    #[test]
    fn clamp_falls_back_to_the_default_when_unset() {
        assert_eq!(clamp_timeout_value(None, 300, 3600).unwrap(), 300);
    }

    #[test]
    fn clamp_caps_a_too_large_request_at_the_max() {
        assert_eq!(clamp_timeout_value(Some(10_000), 300, 3600).unwrap(), 3600);
    }

    #[test]
    fn clamp_passes_through_a_value_within_bounds() {
        assert_eq!(clamp_timeout_value(Some(120), 300, 3600).unwrap(), 120);
    }
}
