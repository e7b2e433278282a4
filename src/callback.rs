use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{DependencyInstallStatus, ExecutionStatus, SessionStatus};
use crate::repo::{ExecutionRepo, RepoError, RepoResult, SessionRepo};
use crate::scheduling_service::SchedulingService;

#[derive(Debug, Deserialize)]
pub struct ContainerReadyPayload {
    pub session_id: String,
    #[allow(dead_code)]
    pub container_id: String,
    pub executor_port: i32,
    pub deps_status: Option<DepsStatusPayload>,
    pub seq: i64,
}

#[derive(Debug, Deserialize)]
pub struct DepsStatusPayload {
    pub status: String,
    pub error: Option<String>,
    #[serde(default)]
    pub installed: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ContainerExitedPayload {
    pub session_id: String,
    pub exit_code: i32,
    pub reason: String,
    pub seq: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionResultPayload {
    pub execution_id: String,
    pub status: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub return_value: Option<serde_json::Value>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
    pub seq: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionMetrics {
    pub duration_ms: Option<i64>,
    pub cpu_time_ms: Option<i64>,
    pub memory_peak_mb: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub accepted: bool,
    pub reason: &'static str,
}

fn ack(accepted: bool, reason: &'static str) -> CallbackAck {
    CallbackAck { accepted, reason }
}

/// Dedupe keys are `(entity_id, kind)`; the stored value is the highest
/// `seq` processed so far. A callback replayed with `seq <= stored` is a
/// no-op ack, not an error, so retrying callers never see a failure.
struct Dedupe {
    seen: Mutex<HashMap<(String, &'static str), i64>>,
}

impl Dedupe {
    fn new() -> Self {
        Self { seen: Mutex::new(HashMap::new()) }
    }

    /// Returns true if this call is new (not a replay) and records it.
    async fn admit(&self, entity_id: &str, kind: &'static str, seq: i64) -> bool {
        let mut seen = self.seen.lock().await;
        let key = (entity_id.to_string(), kind);
        match seen.get(&key) {
            Some(&last) if seq <= last => false,
            _ => {
                seen.insert(key, seq);
                true
            }
        }
    }
}

/// Authenticated by a shared token (checked by the API-layer middleware
/// before a handler ever reaches here). Every entry point is idempotent.
pub struct CallbackHandler {
    pool: sqlx::MySqlPool,
    scheduling: Arc<SchedulingService>,
    dedupe: Dedupe,
}

impl CallbackHandler {
    pub fn new(pool: sqlx::MySqlPool, scheduling: Arc<SchedulingService>) -> Self {
        Self { pool, scheduling, dedupe: Dedupe::new() }
    }

    pub async fn container_ready(&self, payload: ContainerReadyPayload) -> RepoResult<CallbackAck> {
        if !self.dedupe.admit(&payload.session_id, "container_ready", payload.seq).await {
            return Ok(ack(true, "duplicate_ignored"));
        }

        let mut session = SessionRepo::require_by_id(&self.pool, &payload.session_id).await?;
        if session.status() != SessionStatus::Creating {
            return Ok(ack(true, "session_not_creating"));
        }

        session.executor_port = Some(payload.executor_port);
        if let Some(deps) = &payload.deps_status {
            session.dependency_install_status = deps.status.clone();
            session.dependency_install_error = deps.error.clone();
            if !deps.installed.is_null() {
                session.installed_dependencies = deps.installed.clone();
            }
            if deps.status == DependencyInstallStatus::Failed.as_str() {
                session
                    .mark_as_failed(
                        format!("dependency_install_failed: {}", deps.error.clone().unwrap_or_default()),
                        Utc::now(),
                    )
                    .map_err(|e| RepoError::Database(sqlx::Error::Protocol(e.to_string())))?;
                SessionRepo::save(&self.pool, &session).await?;
                return Ok(ack(true, "session_failed_dependency_install"));
            }
        }

        let runtime_node_id = session.runtime_node_id.clone().unwrap_or_default();
        let container_id = session.container_id.clone().unwrap_or_default();
        session
            .mark_as_running(runtime_node_id, container_id, Utc::now())
            .map_err(|e| RepoError::Database(sqlx::Error::Protocol(e.to_string())))?;
        SessionRepo::save(&self.pool, &session).await?;

        info!(session_id = %payload.session_id, "session marked running via callback");
        Ok(ack(true, "applied"))
    }

    pub async fn container_exited(&self, payload: ContainerExitedPayload) -> RepoResult<CallbackAck> {
        if !self.dedupe.admit(&payload.session_id, "container_exited", payload.seq).await {
            return Ok(ack(true, "duplicate_ignored"));
        }

        let mut session = SessionRepo::require_by_id(&self.pool, &payload.session_id).await?;
        if session.status().is_terminal() {
            return Ok(ack(true, "already_terminal"));
        }

        let now = Utc::now();
        if payload.reason == "sigterm" || payload.reason == "client-initiated" {
            session.mark_as_terminated(now);
        } else if payload.exit_code != 0 {
            session
                .mark_as_failed(format!("container_exited_nonzero:{}", payload.exit_code), now)
                .map_err(|e| RepoError::Database(sqlx::Error::Protocol(e.to_string())))?;
        } else {
            session
                .mark_as_completed(now)
                .map_err(|e| RepoError::Database(sqlx::Error::Protocol(e.to_string())))?;
        }
        SessionRepo::save(&self.pool, &session).await?;

        if let Err(e) = self.scheduling.release_for_session(&session).await {
            warn!(session_id = %payload.session_id, "failed to release node capacity: {e}");
        }

        info!(session_id = %payload.session_id, exit_code = payload.exit_code, "session container exited");
        Ok(ack(true, "applied"))
    }

    /// Not sequence-numbered like the other three: a heartbeat only ever
    /// moves `last_heartbeat_at` forward, so replaying an old one is
    /// naturally harmless without a dedupe table entry.
    pub async fn execution_heartbeat(&self, execution_id: &str) -> RepoResult<CallbackAck> {
        let mut execution = ExecutionRepo::require_by_id(&self.pool, execution_id).await?;
        if execution.status().is_terminal() {
            return Ok(ack(true, "already_terminal"));
        }
        execution.last_heartbeat_at = Some(Utc::now());
        ExecutionRepo::save(&self.pool, &execution).await?;
        Ok(ack(true, "applied"))
    }

    pub async fn execution_result(&self, payload: ExecutionResultPayload) -> RepoResult<CallbackAck> {
        if !self.dedupe.admit(&payload.execution_id, "execution_result", payload.seq).await {
            return Ok(ack(true, "duplicate_ignored"));
        }

        let mut execution = ExecutionRepo::require_by_id(&self.pool, &payload.execution_id).await?;
        if execution.status().is_terminal() {
            return Ok(ack(true, "already_terminal"));
        }

        let now = Utc::now();
        let result = match payload.status.as_str() {
            "COMPLETED" => execution.mark_completed(
                payload.stdout,
                payload.stderr,
                payload.exit_code.unwrap_or(0),
                payload.return_value,
                payload.metrics.duration_ms,
                now,
            ),
            "TIMEOUT" => execution.mark_timeout(now),
            "CRASHED" => execution.mark_crashed(),
            _ => {
                execution.stdout = payload.stdout;
                execution.stderr = payload.stderr;
                execution.exit_code = payload.exit_code;
                execution.mark_failed(format!("executor_reported:{}", payload.status), now)
            }
        };
        execution.cpu_time_ms = payload.metrics.cpu_time_ms;
        execution.memory_peak_mb = payload.metrics.memory_peak_mb;

        result.map_err(|e| RepoError::Database(sqlx::Error::Protocol(e.to_string())))?;
        ExecutionRepo::save(&self.pool, &execution).await?;

        info!(execution_id = %payload.execution_id, status = %payload.status, "execution result applied");
        Ok(ack(true, "applied"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedupe_rejects_stale_seq() {
        let d = Dedupe::new();
        assert!(d.admit("s1", "container_ready", 1).await);
        assert!(d.admit("s1", "container_ready", 2).await);
        assert!(!d.admit("s1", "container_ready", 2).await);
        assert!(!d.admit("s1", "container_ready", 1).await);
    }

    #[tokio::test]
    async fn dedupe_is_independent_per_kind_and_entity() {
        let d = Dedupe::new();
        assert!(d.admit("s1", "container_ready", 1).await);
        assert!(d.admit("s1", "container_exited", 1).await);
        assert!(d.admit("s2", "container_ready", 1).await);
    }
}
