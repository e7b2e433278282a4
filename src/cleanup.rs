use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::domain::SessionStatus;
use crate::repo::SessionRepo;
use crate::scheduler::ContainerScheduler;
use crate::scheduling_service::SchedulingService;
use crate::session_service::SessionService;

/// Three independent loops, ported from `session_cleanup_service.py`. Each
/// tolerates partial failures: one session erroring never stops the scan.
pub struct CleanupService {
    pool: sqlx::MySqlPool,
    sessions: Arc<SessionService>,
    scheduler: Arc<dyn ContainerScheduler>,
    scheduling: Arc<SchedulingService>,
    idle_timeout_minutes: i64,
    max_lifetime_hours: i64,
    creating_timeout_secs: i64,
}

impl CleanupService {
    pub fn new(
        pool: sqlx::MySqlPool,
        sessions: Arc<SessionService>,
        scheduler: Arc<dyn ContainerScheduler>,
        scheduling: Arc<SchedulingService>,
        idle_timeout_minutes: i64,
        max_lifetime_hours: i64,
        creating_timeout_secs: i64,
    ) -> Self {
        Self {
            pool,
            sessions,
            scheduler,
            scheduling,
            idle_timeout_minutes,
            max_lifetime_hours,
            creating_timeout_secs,
        }
    }

    /// Terminates sessions idle past `idle_timeout_minutes` or older than
    /// `max_lifetime_hours`. Set either threshold to <= 0 to disable it.
    pub async fn cleanup_idle_sessions(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let candidates = SessionRepo::find_by_statuses(
            &self.pool,
            &[SessionStatus::Creating.as_str(), SessionStatus::Running.as_str()],
        )
        .await?;

        for session in candidates {
            let idle = self.idle_timeout_minutes > 0 && session.is_idle(now, self.idle_timeout_minutes);
            let expired = self.max_lifetime_hours > 0 && session.is_expired(now, self.max_lifetime_hours);
            if !idle && !expired {
                continue;
            }
            if let Err(e) = self.sessions.terminate_session(&session.id).await {
                warn!(session_id = %session.id, "idle/lifetime cleanup terminate failed: {e:?}");
            }
        }
        Ok(())
    }

    /// Sessions stuck in CREATING past `creating_timeout_secs` are marked FAILED.
    pub async fn cleanup_stuck_creating(&self) -> anyhow::Result<()> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.creating_timeout_secs);
        let stuck = SessionRepo::find_stuck_creating(&self.pool, cutoff).await?;
        for session in stuck {
            if let Err(e) = self
                .sessions
                .fail_stuck_creating(&session.id, "stuck_in_creating_past_timeout")
                .await
            {
                warn!(session_id = %session.id, "stuck-creating cleanup failed: {e:?}");
            }
        }
        Ok(())
    }

    /// Destroys lingering containers for sessions already in a terminal
    /// state; never rewrites Session status (the container, not the row, is
    /// the orphan here).
    pub async fn cleanup_orphans(&self) -> anyhow::Result<()> {
        let orphans = SessionRepo::find_orphan_candidates(&self.pool).await?;
        for session in orphans {
            let Some(container_id) = session.container_id.clone() else { continue };
            match self.scheduler.is_running(&container_id).await {
                Ok(false) => continue,
                Err(_) => continue,
                Ok(true) => {
                    if let Err(e) = self.scheduling.destroy(&container_id).await {
                        warn!(session_id = %session.id, "orphan container destroy failed: {e}");
                        continue;
                    }
                    if let Err(e) = self.scheduling.release_for_session(&session).await {
                        warn!(session_id = %session.id, "orphan capacity release failed: {e}");
                    }
                }
            }
        }
        Ok(())
    }
}
