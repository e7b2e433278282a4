use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("connection error to {0}")]
    Connection(String),
    #[error("timeout calling {0}")]
    Timeout(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("executor returned {status}: {body}")]
    Response { status: u16, body: String },
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Health checks use a tighter deadline than the general call timeout.
const HEALTH_CHECK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct ExecuteRequest {
    pub execution_id: String,
    pub session_id: String,
    pub code: String,
    pub language: String,
    pub event: serde_json::Value,
    pub timeout: i32,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_executions: u32,
}

/// What to do with a completed HTTP response, independent of the transport.
#[derive(Debug, PartialEq, Eq)]
enum StatusOutcome {
    Success,
    ClientError,
    Retry,
    ServerErrorExhausted,
}

/// Classifies an executor response status against the retry budget.
/// 2xx succeeds, 4xx is terminal (caller error, retrying won't help),
/// 5xx retries until `max_retries` is exhausted, then becomes terminal.
fn classify_status(status: u16, attempt: u32, max_retries: u32) -> StatusOutcome {
    if status == 200 {
        StatusOutcome::Success
    } else if (400..500).contains(&status) {
        StatusOutcome::ClientError
    } else if status >= 500 && attempt + 1 < max_retries {
        StatusOutcome::Retry
    } else {
        StatusOutcome::ServerErrorExhausted
    }
}

/// Whether a connection failure should be retried against the budget.
fn should_retry_connect_error(attempt: u32, max_retries: u32) -> bool {
    attempt + 1 < max_retries
}

fn backoff_for_attempt(base: std::time::Duration, attempt: u32) -> std::time::Duration {
    base * (attempt + 1)
}

/// HTTP client to the in-container executor. Retries only on connection
/// failure and 5xx, with exponential backoff; 4xx and timeouts are terminal.
pub struct ExecutorClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff_base: std::time::Duration,
}

impl ExecutorClient {
    pub fn new(connect_timeout: std::time::Duration, call_timeout: std::time::Duration, max_retries: u32, retry_backoff_base_secs: f64) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(call_timeout)
            .build()
            .expect("failed to build executor http client");
        Self {
            client,
            max_retries,
            retry_backoff_base: std::time::Duration::from_secs_f64(retry_backoff_base_secs),
        }
    }

    pub async fn submit(&self, executor_url: &str, req: &ExecuteRequest) -> ExecutorResult<String> {
        let url = format!("{}/execute", executor_url.trim_end_matches('/'));

        info!(
            execution_id = %req.execution_id,
            language = %req.language,
            "submitting execution request to {executor_url}"
        );

        for attempt in 0..self.max_retries {
            let result = self.client.post(&url).json(req).send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match classify_status(status, attempt, self.max_retries) {
                        StatusOutcome::Success => {
                            let body: ExecuteResponse = resp
                                .json()
                                .await
                                .map_err(|e| ExecutorError::Response { status: 200, body: e.to_string() })?;
                            return Ok(body.execution_id);
                        }
                        StatusOutcome::ClientError if status == 400 => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(ExecutorError::Validation(body));
                        }
                        StatusOutcome::ClientError => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(ExecutorError::Response { status, body });
                        }
                        StatusOutcome::Retry => {
                            warn!("executor returned {status}, retrying (attempt {})", attempt + 1);
                            tokio::time::sleep(backoff_for_attempt(self.retry_backoff_base, attempt)).await;
                            continue;
                        }
                        StatusOutcome::ServerErrorExhausted => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(ExecutorError::Response { status, body });
                        }
                    }
                }
                Err(e) if e.is_timeout() => {
                    return Err(ExecutorError::Timeout(executor_url.to_string()));
                }
                Err(e) if e.is_connect() => {
                    if should_retry_connect_error(attempt, self.max_retries) {
                        warn!("failed to connect to executor {executor_url}, retrying (attempt {}): {e}", attempt + 1);
                        tokio::time::sleep(backoff_for_attempt(self.retry_backoff_base, attempt)).await;
                        continue;
                    }
                    return Err(ExecutorError::Connection(executor_url.to_string()));
                }
                Err(e) => return Err(ExecutorError::Connection(e.to_string())),
            }
        }

        Err(ExecutorError::Connection(format!("{executor_url}: max retries exceeded")))
    }

    pub async fn health(&self, executor_url: &str) -> ExecutorResult<HealthResponse> {
        let url = format!("{}/health", executor_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout(executor_url.to_string())
                } else {
                    ExecutorError::Connection(executor_url.to_string())
                }
            })?;

        if resp.status().as_u16() == 200 {
            resp.json()
                .await
                .map_err(|e| ExecutorError::Response { status: 200, body: e.to_string() })
        } else {
            Err(ExecutorError::Unavailable(format!("status_code={}", resp.status())))
        }
    }

    /// Releases this client's pooled connections. `reqwest::Client` manages
    /// its own idle-connection pool with no explicit drain API; this exists
    /// so callers have a symmetric shutdown hook alongside `submit`/`health`.
    pub async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_200_is_always_a_success() {
        assert_eq!(classify_status(200, 0, 3), StatusOutcome::Success);
    }

    #[test]
    fn a_4xx_is_terminal_even_with_retries_left() {
        assert_eq!(classify_status(400, 0, 3), StatusOutcome::ClientError);
        assert_eq!(classify_status(404, 0, 3), StatusOutcome::ClientError);
    }

    #[test]
    fn a_5xx_retries_while_attempts_remain() {
        assert_eq!(classify_status(503, 0, 3), StatusOutcome::Retry);
        assert_eq!(classify_status(503, 1, 3), StatusOutcome::Retry);
    }

    #[test]
    fn a_5xx_becomes_terminal_once_retries_are_exhausted() {
        assert_eq!(classify_status(503, 2, 3), StatusOutcome::ServerErrorExhausted);
    }

    #[test]
    fn connect_errors_follow_the_same_retry_budget() {
        assert!(should_retry_connect_error(0, 3));
        assert!(should_retry_connect_error(1, 3));
        assert!(!should_retry_connect_error(2, 3));
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let base = std::time::Duration::from_secs_f64(0.5);
        assert_eq!(backoff_for_attempt(base, 0), std::time::Duration::from_millis(500));
        assert_eq!(backoff_for_attempt(base, 1), std::time::Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(base, 2), std::time::Duration::from_millis(1500));
    }
}
