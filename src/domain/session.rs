use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Session lifecycle states. Only the edges in [`Session`]'s `mark_as_*`
/// methods are legal; everything else is a `ValidationError` at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Creating,
    Running,
    Completed,
    Failed,
    Timeout,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Creating => "CREATING",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Timeout => "TIMEOUT",
            SessionStatus::Terminated => "TERMINATED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Timeout
                | SessionStatus::Terminated
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(SessionStatus::Creating),
            "RUNNING" => Ok(SessionStatus::Running),
            "COMPLETED" => Ok(SessionStatus::Completed),
            "FAILED" => Ok(SessionStatus::Failed),
            "TIMEOUT" => Ok(SessionStatus::Timeout),
            "TERMINATED" => Ok(SessionStatus::Terminated),
            other => Err(anyhow::anyhow!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyInstallStatus {
    Pending,
    Installing,
    Completed,
    Failed,
}

impl DependencyInstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyInstallStatus::Pending => "pending",
            DependencyInstallStatus::Installing => "installing",
            DependencyInstallStatus::Completed => "completed",
            DependencyInstallStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DependencyInstallStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DependencyInstallStatus::Pending),
            "installing" => Ok(DependencyInstallStatus::Installing),
            "completed" => Ok(DependencyInstallStatus::Completed),
            "failed" => Ok(DependencyInstallStatus::Failed),
            other => Err(anyhow::anyhow!("unknown dependency install status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledDependency {
    pub name: String,
    pub version: String,
    pub install_location: String,
    pub installed_at: DateTime<Utc>,
    pub from_template: bool,
}

/// Row shape for the `sessions` table. `status` and `dependency_install_status`
/// are persisted as plain strings (same convention the rest of this table
/// family uses) and parsed through their typed enums at the call site.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub template_id: String,
    pub status: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub disk_limit: String,
    pub max_processes: i32,
    pub workspace_uri: String,
    pub runtime_type: String,
    pub runtime_node_id: Option<String>,
    pub container_id: Option<String>,
    pub executor_port: Option<i32>,
    pub env_vars: serde_json::Value,
    pub timeout_secs: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub requested_dependencies: serde_json::Value,
    pub installed_dependencies: serde_json::Value,
    pub dependency_install_status: String,
    pub dependency_install_error: Option<String>,
    pub fail_reason: Option<String>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.status
            .parse()
            .unwrap_or_else(|_| panic!("invalid status in row: {}", self.status))
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status(), SessionStatus::Creating | SessionStatus::Running)
    }

    pub fn is_idle(&self, now: DateTime<Utc>, threshold_minutes: i64) -> bool {
        if !self.is_active() {
            return false;
        }
        now.signed_duration_since(self.last_activity_at) > chrono::Duration::minutes(threshold_minutes)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_hours: i64) -> bool {
        now.signed_duration_since(self.created_at) > chrono::Duration::hours(max_hours)
    }

    pub fn is_stuck_creating(&self, now: DateTime<Utc>, creating_timeout_secs: i64) -> bool {
        self.status() == SessionStatus::Creating
            && now.signed_duration_since(self.created_at) > chrono::Duration::seconds(creating_timeout_secs)
    }

    /// CREATING -> RUNNING. Errors if the current status isn't CREATING.
    pub fn mark_as_running(&mut self, runtime_node_id: String, container_id: String, now: DateTime<Utc>) -> anyhow::Result<()> {
        if self.status() != SessionStatus::Creating {
            anyhow::bail!("cannot mark session as running from status: {}", self.status);
        }
        self.status = SessionStatus::Running.as_str().to_string();
        self.runtime_node_id = Some(runtime_node_id);
        self.container_id = Some(container_id);
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING -> COMPLETED.
    pub fn mark_as_completed(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        if self.status() != SessionStatus::Running {
            anyhow::bail!("cannot mark session as completed from status: {}", self.status);
        }
        self.status = SessionStatus::Completed.as_str().to_string();
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// CREATING|RUNNING -> FAILED.
    pub fn mark_as_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> anyhow::Result<()> {
        let status = self.status();
        if status != SessionStatus::Creating && status != SessionStatus::Running {
            anyhow::bail!("cannot mark session as failed from status: {}", self.status);
        }
        self.status = SessionStatus::Failed.as_str().to_string();
        self.fail_reason = Some(reason.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING -> TIMEOUT.
    pub fn mark_as_timeout(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        if self.status() != SessionStatus::Running {
            anyhow::bail!("cannot mark session as timed out from status: {}", self.status);
        }
        self.status = SessionStatus::Timeout.as_str().to_string();
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Any non-terminal -> TERMINATED. Idempotent: a no-op if already terminated.
    pub fn mark_as_terminated(&mut self, now: DateTime<Utc>) {
        if self.status() == SessionStatus::Terminated {
            return;
        }
        self.status = SessionStatus::Terminated.as_str().to_string();
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn update_last_activity(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
        self.updated_at = now;
    }

    pub fn has_dependencies(&self) -> bool {
        self.requested_dependencies
            .as_array()
            .map(|a| !a.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(status: SessionStatus) -> Session {
        let now = Utc::now();
        Session {
            id: "s1".into(),
            template_id: "t1".into(),
            status: status.as_str().into(),
            cpu_limit: "1".into(),
            memory_limit: "512Mi".into(),
            disk_limit: "1Gi".into(),
            max_processes: 64,
            workspace_uri: "objstore://tsbx/sessions/s1/".into(),
            runtime_type: "local".into(),
            runtime_node_id: None,
            container_id: None,
            executor_port: None,
            env_vars: serde_json::json!({}),
            timeout_secs: 300,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            completed_at: None,
            requested_dependencies: serde_json::json!([]),
            installed_dependencies: serde_json::json!([]),
            dependency_install_status: DependencyInstallStatus::Completed.as_str().into(),
            dependency_install_error: None,
            fail_reason: None,
        }
    }

    #[test]
    fn running_to_completed_is_legal() {
        let mut s = fresh(SessionStatus::Running);
        s.mark_as_completed(Utc::now()).unwrap();
        assert_eq!(s.status(), SessionStatus::Completed);
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn creating_to_completed_is_rejected() {
        let mut s = fresh(SessionStatus::Creating);
        assert!(s.mark_as_completed(Utc::now()).is_err());
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut s = fresh(SessionStatus::Running);
        let now = Utc::now();
        s.mark_as_terminated(now);
        let completed_at = s.completed_at;
        s.mark_as_terminated(now + chrono::Duration::seconds(5));
        assert_eq!(s.completed_at, completed_at);
    }

    #[test]
    fn idle_and_expired_boundaries() {
        let mut s = fresh(SessionStatus::Running);
        let now = Utc::now();
        s.last_activity_at = now - chrono::Duration::minutes(31);
        assert!(s.is_idle(now, 30));
        s.last_activity_at = now - chrono::Duration::minutes(29);
        assert!(!s.is_idle(now, 30));

        s.created_at = now - chrono::Duration::hours(7);
        assert!(s.is_expired(now, 6));
    }
}
