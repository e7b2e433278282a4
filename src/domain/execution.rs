use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Crashed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Crashed => "CRASHED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::Timeout),
            "CRASHED" => Ok(ExecutionStatus::Crashed),
            other => Err(anyhow::anyhow!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub session_id: String,
    pub code: String,
    pub language: String,
    pub timeout_secs: i32,
    pub event: serde_json::Value,
    pub status: String,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub return_value: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub cpu_time_ms: Option<i64>,
    pub memory_peak_mb: Option<i64>,
    pub retry_count: i32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

pub const MAX_EXECUTION_RETRIES: i32 = 3;
/// An execution with no heartbeat for this long is considered stalled.
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 15;

impl Execution {
    pub fn status(&self) -> ExecutionStatus {
        self.status
            .parse()
            .unwrap_or_else(|_| panic!("invalid status in row: {}", self.status))
    }

    pub fn is_running(&self) -> bool {
        self.status() == ExecutionStatus::Running
    }

    /// PENDING -> RUNNING.
    pub fn mark_running(&mut self) -> anyhow::Result<()> {
        if self.status() != ExecutionStatus::Pending {
            anyhow::bail!("cannot mark execution as running from status: {}", self.status);
        }
        self.status = ExecutionStatus::Running.as_str().into();
        Ok(())
    }

    /// RUNNING -> COMPLETED, carrying the executor's result.
    pub fn mark_completed(
        &mut self,
        stdout: Option<String>,
        stderr: Option<String>,
        exit_code: i32,
        return_value: Option<serde_json::Value>,
        duration_ms: Option<i64>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if self.status() != ExecutionStatus::Running {
            anyhow::bail!("cannot mark execution as completed from status: {}", self.status);
        }
        self.status = ExecutionStatus::Completed.as_str().into();
        self.stdout = stdout;
        self.stderr = stderr;
        self.exit_code = Some(exit_code);
        self.return_value = return_value;
        self.duration_ms = duration_ms;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self, error_detail: impl Into<String>, now: DateTime<Utc>) -> anyhow::Result<()> {
        if self.status().is_terminal() {
            anyhow::bail!("cannot mark execution as failed from terminal status: {}", self.status);
        }
        self.status = ExecutionStatus::Failed.as_str().into();
        self.error_detail = Some(error_detail.into());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn mark_timeout(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        if self.status().is_terminal() {
            anyhow::bail!("cannot mark execution as timed out from terminal status: {}", self.status);
        }
        self.status = ExecutionStatus::Timeout.as_str().into();
        self.completed_at = Some(now);
        Ok(())
    }

    /// RUNNING -> CRASHED: the container backing this execution disappeared.
    pub fn mark_crashed(&mut self) -> anyhow::Result<()> {
        if self.status() != ExecutionStatus::Running {
            anyhow::bail!("cannot mark execution as crashed from status: {}", self.status);
        }
        self.status = ExecutionStatus::Crashed.as_str().into();
        Ok(())
    }

    pub fn can_retry(&self, max_retries: i32) -> bool {
        self.status() == ExecutionStatus::Crashed && self.retry_count < max_retries
    }

    /// CRASHED -> PENDING, bumping the retry counter.
    pub fn mark_retry(&mut self) -> anyhow::Result<()> {
        if self.status() != ExecutionStatus::Crashed {
            anyhow::bail!("cannot retry execution from status: {}", self.status);
        }
        self.status = ExecutionStatus::Pending.as_str().into();
        self.retry_count += 1;
        Ok(())
    }

    pub fn is_heartbeat_timeout(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        match self.last_heartbeat_at {
            Some(t) => now.signed_duration_since(t) > chrono::Duration::seconds(timeout_secs),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Execution {
        let now = Utc::now();
        Execution {
            id: "exec-1".to_string(),
            session_id: "sess-1".to_string(),
            code: "print(1)".to_string(),
            language: "python".to_string(),
            timeout_secs: 300,
            event: serde_json::json!({}),
            status: ExecutionStatus::Pending.as_str().to_string(),
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
        }
    }

    #[test]
    fn crashed_is_not_terminal_but_completed_is() {
        assert!(!ExecutionStatus::Crashed.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
    }

    #[test]
    fn happy_path_transitions() {
        let mut e = pending();
        e.mark_running().unwrap();
        assert!(e.is_running());
        e.mark_completed(Some("ok".into()), None, 0, None, Some(12), Utc::now()).unwrap();
        assert_eq!(e.status(), ExecutionStatus::Completed);
    }

    #[test]
    fn cannot_complete_a_pending_execution() {
        let mut e = pending();
        assert!(e.mark_completed(None, None, 0, None, None, Utc::now()).is_err());
    }

    #[test]
    fn crashed_executions_can_retry_until_the_limit() {
        let mut e = pending();
        e.mark_running().unwrap();
        e.mark_crashed().unwrap();
        assert!(e.can_retry(MAX_EXECUTION_RETRIES));
        e.mark_retry().unwrap();
        assert_eq!(e.retry_count, 1);
        assert_eq!(e.status(), ExecutionStatus::Pending);
    }

    #[test]
    fn cannot_fail_an_already_terminal_execution() {
        let mut e = pending();
        e.mark_running().unwrap();
        e.mark_completed(None, None, 0, None, None, Utc::now()).unwrap();
        assert!(e.mark_failed("late error", Utc::now()).is_err());
    }

    #[test]
    fn heartbeat_timeout_detection() {
        let mut e = pending();
        e.mark_running().unwrap();
        e.last_heartbeat_at = Some(Utc::now() - chrono::Duration::seconds(60));
        assert!(e.is_heartbeat_timeout(Utc::now(), HEARTBEAT_TIMEOUT_SECS));
        e.last_heartbeat_at = Some(Utc::now());
        assert!(!e.is_heartbeat_timeout(Utc::now(), HEARTBEAT_TIMEOUT_SECS));
    }
}
