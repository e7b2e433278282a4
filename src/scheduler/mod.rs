pub mod cluster;
pub mod docker;

pub use cluster::ClusterScheduler;
pub use docker::DockerScheduler;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("runtime unreachable: {0}")]
    Unreachable(String),
    #[error("runtime error: {0}")]
    Other(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub env_vars: HashMap<String, String>,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub disk_limit: String,
    pub workspace_uri: String,
    pub labels: HashMap<String, String>,
    pub network: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRunState {
    Created,
    Running,
    Exited,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub status: ContainerRunState,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    Timeout,
}

/// Uniform operations over a container runtime. Two implementations exist:
/// a local daemon ([`DockerScheduler`]) and a cluster orchestrator
/// ([`ClusterScheduler`]); callers depend only on this trait.
#[async_trait]
pub trait ContainerScheduler: Send + Sync {
    async fn create(&self, cfg: &ContainerConfig) -> SchedulerResult<String>;
    async fn start(&self, id: &str) -> SchedulerResult<()>;
    async fn stop(&self, id: &str, grace_sec: u64) -> SchedulerResult<()>;
    async fn remove(&self, id: &str, force: bool) -> SchedulerResult<()>;
    async fn inspect(&self, id: &str) -> SchedulerResult<ContainerInfo>;
    async fn is_running(&self, id: &str) -> SchedulerResult<bool>;
    async fn logs(&self, id: &str, tail: usize) -> SchedulerResult<String>;
    async fn wait(&self, id: &str, timeout_sec: u64) -> SchedulerResult<WaitOutcome>;
    async fn ping(&self) -> SchedulerResult<()>;
    async fn exec(&self, id: &str, cmd: &[&str]) -> SchedulerResult<String>;
}
