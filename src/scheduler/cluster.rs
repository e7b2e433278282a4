use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    ContainerConfig, ContainerInfo, ContainerRunState, ContainerScheduler, SchedulerError,
    SchedulerResult, WaitOutcome,
};

/// Cluster-orchestrator variant of the Container Scheduler Port. No
/// kubernetes client crate appears anywhere in the example pack, so this
/// talks to a generic cluster scheduling API over HTTP with `reqwest`
/// (already part of the dependency stack for the Executor Client) rather
/// than introducing an unvetted dependency for a single backend.
pub struct ClusterScheduler {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    cfg: &'a ContainerConfig,
}

#[derive(Deserialize)]
struct CreateResponse {
    pod_id: String,
}

#[derive(Deserialize)]
struct InspectResponse {
    status: String,
    exit_code: Option<i32>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    exited_at: Option<chrono::DateTime<chrono::Utc>>,
    ip: Option<String>,
    image: String,
}

impl ClusterScheduler {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("failed to build cluster scheduler http client"),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ContainerScheduler for ClusterScheduler {
    async fn create(&self, cfg: &ContainerConfig) -> SchedulerResult<String> {
        let resp = self
            .client
            .post(self.url("/pods"))
            .json(&CreateRequest { cfg })
            .send()
            .await
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))?;

        match resp.status().as_u16() {
            200 | 201 => resp
                .json::<CreateResponse>()
                .await
                .map(|r| r.pod_id)
                .map_err(|e| SchedulerError::Other(e.to_string())),
            409 => Err(SchedulerError::AlreadyExists(cfg.name.clone())),
            status => Err(SchedulerError::Other(format!("cluster create returned {status}"))),
        }
    }

    async fn start(&self, id: &str) -> SchedulerResult<()> {
        self.post_ok(&format!("/pods/{id}/start")).await
    }

    async fn stop(&self, id: &str, grace_sec: u64) -> SchedulerResult<()> {
        self.post_ok(&format!("/pods/{id}/stop?grace_sec={grace_sec}")).await
    }

    async fn remove(&self, id: &str, force: bool) -> SchedulerResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/pods/{id}?force={force}")))
            .send()
            .await
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))?;
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(SchedulerError::Other(format!("cluster remove returned {}", resp.status())))
        }
    }

    async fn inspect(&self, id: &str) -> SchedulerResult<ContainerInfo> {
        let resp = self
            .client
            .get(self.url(&format!("/pods/{id}")))
            .send()
            .await
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        let body: InspectResponse = resp
            .json()
            .await
            .map_err(|e| SchedulerError::Other(e.to_string()))?;

        let status = match body.status.as_str() {
            "running" => ContainerRunState::Running,
            "exited" => ContainerRunState::Exited,
            "created" => ContainerRunState::Created,
            _ => ContainerRunState::Unknown,
        };

        Ok(ContainerInfo {
            status,
            exit_code: body.exit_code,
            started_at: body.started_at,
            exited_at: body.exited_at,
            ip: body.ip,
            image: body.image,
        })
    }

    async fn is_running(&self, id: &str) -> SchedulerResult<bool> {
        match self.inspect(id).await {
            Ok(info) => Ok(info.status == ContainerRunState::Running),
            Err(SchedulerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn logs(&self, id: &str, tail: usize) -> SchedulerResult<String> {
        let resp = self
            .client
            .get(self.url(&format!("/pods/{id}/logs?tail={tail}")))
            .send()
            .await
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        resp.text().await.map_err(|e| SchedulerError::Other(e.to_string()))
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
        self.post_ok("/healthz").await
    }

    async fn exec(&self, id: &str, cmd: &[&str]) -> SchedulerResult<String> {
        let resp = self
            .client
            .post(self.url(&format!("/pods/{id}/exec")))
            .json(&serde_json::json!({ "cmd": cmd }))
            .send()
            .await
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))?;
        resp.text().await.map_err(|e| SchedulerError::Other(e.to_string()))
    }
}

impl ClusterScheduler {
    async fn post_ok(&self, path: &str) -> SchedulerResult<()> {
        let resp = self
            .client
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| SchedulerError::Unreachable(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SchedulerError::Other(format!("cluster call to {path} returned {}", resp.status())))
        }
    }
}
