use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::domain::{Session, SessionStatus};
use crate::repo::SessionRepo;
use crate::scheduler::ContainerScheduler;
use crate::scheduling_service::{create_and_start_or_rollback, SchedulingService};

/// Reconciles Session rows against the container runtime's ground truth.
/// Ported from `state_sync_service.py`'s `sync_on_startup` /
/// `periodic_health_check` / `_attempt_recovery` into tokio tasks.
pub struct StateSyncService {
    pool: sqlx::MySqlPool,
    scheduler: Arc<dyn ContainerScheduler>,
    scheduling: Arc<SchedulingService>,
}

impl StateSyncService {
    pub fn new(pool: sqlx::MySqlPool, scheduler: Arc<dyn ContainerScheduler>, scheduling: Arc<SchedulingService>) -> Self {
        Self { pool, scheduler, scheduling }
    }

    /// Run once at process startup over both CREATING and RUNNING sessions.
    pub async fn sync_on_startup(&self) -> anyhow::Result<()> {
        let sessions = SessionRepo::find_by_statuses(
            &self.pool,
            &[SessionStatus::Creating.as_str(), SessionStatus::Running.as_str()],
        )
        .await?;
        info!(count = sessions.len(), "state-sync: startup reconciliation");
        for session in sessions {
            if let Err(e) = self.reconcile_one(session).await {
                warn!("state-sync: startup reconcile failed for a session: {e}");
            }
        }
        Ok(())
    }

    /// Run on the periodic cadence, restricted to RUNNING sessions: a
    /// CREATING session that never reaches RUNNING is the stuck-creating
    /// cleanup loop's job, not this one's.
    pub async fn periodic_health_check(&self) -> anyhow::Result<()> {
        let sessions = SessionRepo::find_by_status(&self.pool, SessionStatus::Running.as_str()).await?;
        for session in sessions {
            if let Err(e) = self.reconcile_one(session).await {
                warn!("state-sync: periodic reconcile failed for a session: {e}");
            }
        }
        Ok(())
    }

    async fn reconcile_one(&self, session: Session) -> anyhow::Result<()> {
        let Some(container_id) = session.container_id.clone() else {
            return Ok(());
        };

        match self.scheduler.is_running(&container_id).await {
            Ok(true) => Ok(()),
            Ok(false) => self.attempt_recovery(session).await,
            Err(e) => {
                warn!(session_id = %session.id, "is_running check failed, treating as unhealthy: {e}");
                self.attempt_recovery(session).await
            }
        }
    }

    /// Destroys the dead container, creates a fresh one reusing the same
    /// workspace_uri/env, and rewires `container_id`. A single attempt: on
    /// failure the session is marked FAILED rather than retried here.
    async fn attempt_recovery(&self, mut session: Session) -> anyhow::Result<()> {
        let node_id = session.runtime_node_id.clone();
        let template = crate::repo::TemplateRepo::require_by_id(&self.pool, &session.template_id).await?;

        if let Some(old_container) = session.container_id.take() {
            let _ = self.scheduler.stop(&old_container, 0).await;
            let _ = self.scheduler.remove(&old_container, true).await;
        }

        let node = match node_id.as_deref() {
            Some(id) => crate::repo::RuntimeNodeRepo::find_by_id(&self.pool, id).await?,
            None => None,
        };
        let Some(node) = node else {
            error!(session_id = %session.id, "recovery failed: runtime node no longer known");
            session.mark_as_failed("recovery_failed: runtime_node_missing", Utc::now()).ok();
            SessionRepo::save(&self.pool, &session).await?;
            return Ok(());
        };

        let cfg = self.scheduling.build_container_config(&session, &template, &node);

        match create_and_start_or_rollback(&self.scheduler, &cfg).await {
            Ok(new_container_id) => {
                session.container_id = Some(new_container_id);
                session.updated_at = Utc::now();
                SessionRepo::save(&self.pool, &session).await?;
                info!(session_id = %session.id, "recovered session onto a fresh container");
            }
            Err(e) => {
                error!(session_id = %session.id, "recovery failed: {e}");
                session.mark_as_failed(format!("recovery_failed: {e}"), Utc::now()).ok();
                SessionRepo::save(&self.pool, &session).await?;
                if let Err(release_err) = self.scheduling.release_for_session(&session).await {
                    warn!(session_id = %session.id, "failed to release node capacity after recovery failure: {release_err}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_marks_failed_reason_is_descriptive() {
        let mut s = test_session();
        s.mark_as_failed("recovery_failed: runtime_node_missing", Utc::now()).unwrap();
        assert_eq!(s.fail_reason.as_deref(), Some("recovery_failed: runtime_node_missing"));
    }

    fn test_session() -> Session {
        let now = Utc::now();
        Session {
            id: "s1".into(),
            template_id: "t1".into(),
            status: SessionStatus::Running.as_str().into(),
            cpu_limit: "1".into(),
            memory_limit: "512Mi".into(),
            disk_limit: "1Gi".into(),
            max_processes: 64,
            workspace_uri: "objstore://tsbx/sessions/s1/".into(),
            runtime_type: "local".into(),
            runtime_node_id: Some("n1".into()),
            container_id: Some("c1".into()),
            executor_port: Some(8080),
            env_vars: serde_json::json!({}),
            timeout_secs: 300,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            completed_at: None,
            requested_dependencies: serde_json::json!([]),
            installed_dependencies: serde_json::json!([]),
            dependency_install_status: "completed".into(),
            dependency_install_error: None,
            fail_reason: None,
        }
    }
}
