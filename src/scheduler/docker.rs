use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions},
    exec::{CreateExecOptions, StartExecResults},
    models::HostConfig,
    Docker,
};
use futures::StreamExt;
use tracing::{info, warn};

use super::{
    ContainerConfig, ContainerInfo, ContainerRunState, ContainerScheduler, SchedulerError,
    SchedulerResult, WaitOutcome,
};

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    ) || err.to_string().contains("No such container")
}

/// Local container-daemon variant of the Container Scheduler Port, backed by
/// `bollard` against the Docker API.
pub struct DockerScheduler {
    docker: Docker,
    executor_port: u16,
}

impl DockerScheduler {
    pub fn new(docker: Docker, executor_port: u16) -> Self {
        Self { docker, executor_port }
    }

    fn container_name(cfg_name: &str) -> String {
        format!("tsbx_session_{}", cfg_name.to_ascii_lowercase())
    }

    fn cpu_quota(cpu_limit: &str) -> i64 {
        let cores: f64 = cpu_limit.trim().parse().unwrap_or(1.0);
        (cores * 100_000.0) as i64
    }

    fn memory_bytes(memory_limit: &str) -> i64 {
        let s = memory_limit.trim();
        let (num, mult): (&str, i64) = if let Some(n) = s.strip_suffix("Gi") {
            (n, 1024 * 1024 * 1024)
        } else if let Some(n) = s.strip_suffix("Mi") {
            (n, 1024 * 1024)
        } else {
            (s, 1)
        };
        let value: f64 = num.trim().parse().unwrap_or(512.0);
        (value * mult as f64) as i64
    }
}

#[async_trait]
impl ContainerScheduler for DockerScheduler {
    async fn create(&self, cfg: &ContainerConfig) -> SchedulerResult<String> {
        let name = Self::container_name(&cfg.name);

        // Idempotent on cfg.name: if a container by this name already
        // exists, return its id instead of failing.
        if let Ok(existing) = self.docker.inspect_container(&name, None).await {
            if let Some(id) = existing.id {
                info!("container {name} already exists, reusing id {id}");
                return Ok(id);
            }
        }

        let env: Vec<String> = cfg
            .env_vars
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let host_config = HostConfig {
            cpu_period: Some(100_000),
            cpu_quota: Some(Self::cpu_quota(&cfg.cpu_limit)),
            memory: Some(Self::memory_bytes(&cfg.memory_limit)),
            network_mode: cfg.network.clone(),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let config = Config {
            image: Some(cfg.image.clone()),
            env: Some(env),
            labels: Some(HashMap::from_iter(
                cfg.labels.iter().map(|(k, v)| (k.clone(), v.clone())),
            )),
            host_config: Some(host_config),
            ..Default::default()
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(response) => Ok(response.id),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => {
                Err(SchedulerError::AlreadyExists(format!(
                    "a different container already holds name {name}"
                )))
            }
            Err(e) => Err(SchedulerError::Other(e.to_string())),
        }
    }

    async fn start(&self, id: &str) -> SchedulerResult<()> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("already started") => Ok(()),
            Err(e) => Err(SchedulerError::Other(e.to_string())),
        }
    }

    async fn stop(&self, id: &str, grace_sec: u64) -> SchedulerResult<()> {
        let options = StopContainerOptions { t: grace_sec as i64 };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) if e.to_string().contains("not running") => Ok(()),
            Err(e) => Err(SchedulerError::Other(e.to_string())),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> SchedulerResult<()> {
        let options = RemoveContainerOptions { force, ..Default::default() };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                warn!("container {id} already removed or doesn't exist, treating as success");
                Ok(())
            }
            Err(e) => Err(SchedulerError::Other(e.to_string())),
        }
    }

    async fn inspect(&self, id: &str) -> SchedulerResult<ContainerInfo> {
        match self.docker.inspect_container(id, None).await {
            Ok(info) => {
                let state = info.state.unwrap_or_default();
                let status = if state.running.unwrap_or(false) {
                    ContainerRunState::Running
                } else if state.status.is_some() {
                    ContainerRunState::Exited
                } else {
                    ContainerRunState::Unknown
                };
                let ip = info
                    .network_settings
                    .and_then(|ns| ns.networks)
                    .and_then(|nets| nets.values().next().cloned())
                    .and_then(|n| n.ip_address)
                    .filter(|s| !s.is_empty());

                Ok(ContainerInfo {
                    status,
                    exit_code: state.exit_code.map(|c| c as i32),
                    started_at: state
                        .started_at
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|d| d.with_timezone(&chrono::Utc)),
                    exited_at: state
                        .finished_at
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|d| d.with_timezone(&chrono::Utc)),
                    ip,
                    image: info.config.and_then(|c| c.image).unwrap_or_default(),
                })
            }
            Err(e) if is_not_found(&e) => Err(SchedulerError::NotFound(id.to_string())),
            Err(e) => Err(SchedulerError::Other(e.to_string())),
        }
    }

    async fn is_running(&self, id: &str) -> SchedulerResult<bool> {
        match self.inspect(id).await {
            Ok(info) => Ok(info.status == ContainerRunState::Running),
            Err(SchedulerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn logs(&self, id: &str, tail: usize) -> SchedulerResult<String> {
        use bollard::container::LogsOptions;
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => out.push_str(&log.to_string()),
                Err(e) if is_not_found(&e) => return Err(SchedulerError::NotFound(id.to_string())),
                Err(e) => return Err(SchedulerError::Other(e.to_string())),
            }
        }
        Ok(out)
    }

    async fn wait(&self, id: &str, timeout_sec: u64) -> SchedulerResult<WaitOutcome> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_sec);
        loop {
            match self.inspect(id).await {
                Ok(info) if info.status == ContainerRunState::Exited => {
                    return Ok(WaitOutcome::Exited(info.exit_code.unwrap_or(-1)));
                }
                Ok(_) => {}
                Err(SchedulerError::NotFound(_)) => return Ok(WaitOutcome::Exited(-1)),
                Err(e) => return Err(e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(WaitOutcome::Timeout);
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    async fn ping(&self) -> SchedulerResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))
    }

    async fn exec(&self, id: &str, cmd: &[&str]) -> SchedulerResult<String> {
        let exec_config = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_config)
            .await
            .map_err(|e| SchedulerError::Other(e.to_string()))?;

        let mut output = String::new();
        if let StartExecResults::Attached { mut output: stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SchedulerError::Other(e.to_string()))?
        {
            while let Some(Ok(msg)) = stream.next().await {
                output.push_str(&msg.to_string());
            }
        }
        Ok(output)
    }
}

impl DockerScheduler {
    pub fn executor_port(&self) -> u16 {
        self.executor_port
    }
}
