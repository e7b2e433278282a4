use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// The crate-wide error taxonomy. Every HTTP error response carries
/// `{error_code, description, error_detail, suggested_remediation}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("conflict: {0}")]
    ConflictError(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("executor unreachable: {0}")]
    ExecutorUnreachable(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    error_code: &'static str,
    description: String,
    error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_remediation: Option<&'static str>,
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::ConflictError(_) => "conflict_error",
            ApiError::ResourceExhausted(_) => "resource_exhausted",
            ApiError::UpstreamUnavailable(_) => "upstream_unavailable",
            ApiError::ExecutorUnreachable(_) => "executor_unreachable",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::ConflictError(_) => StatusCode::CONFLICT,
            ApiError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::ExecutorUnreachable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn suggested_remediation(&self) -> Option<&'static str> {
        match self {
            ApiError::ResourceExhausted(_) => Some("retry after existing sessions free capacity"),
            ApiError::UpstreamUnavailable(_) | ApiError::ExecutorUnreachable(_) => {
                Some("retry with backoff")
            }
            ApiError::Timeout(_) => Some("retry with a longer timeout"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error_code = self.error_code(), "{}", self);
        let body = ErrorBody {
            error_code: self.error_code(),
            description: self.to_string(),
            error_detail: None,
            suggested_remediation: self.suggested_remediation(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<crate::repo::RepoError> for ApiError {
    fn from(e: crate::repo::RepoError) -> Self {
        match e {
            crate::repo::RepoError::NotFound(m) => ApiError::NotFound(m),
            crate::repo::RepoError::Unique(m) => ApiError::ConflictError(m),
            other => ApiError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<crate::executor_client::ExecutorError> for ApiError {
    fn from(e: crate::executor_client::ExecutorError) -> Self {
        match e {
            crate::executor_client::ExecutorError::Validation(m) => ApiError::ValidationError(m),
            crate::executor_client::ExecutorError::Timeout(m) => ApiError::Timeout(m),
            other => ApiError::ExecutorUnreachable(other.to_string()),
        }
    }
}

impl From<crate::objstore::ObjStoreError> for ApiError {
    fn from(e: crate::objstore::ObjStoreError) -> Self {
        match e {
            crate::objstore::ObjStoreError::NotFound(m) => ApiError::NotFound(m),
            crate::objstore::ObjStoreError::InvalidUri(m) => ApiError::ValidationError(m),
            other => ApiError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<crate::scheduler::SchedulerError> for ApiError {
    fn from(e: crate::scheduler::SchedulerError) -> Self {
        match e {
            crate::scheduler::SchedulerError::NotFound(m) => ApiError::NotFound(m),
            crate::scheduler::SchedulerError::AlreadyExists(m) => ApiError::ConflictError(m),
            other => ApiError::UpstreamUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn resource_exhausted_maps_to_503_with_remediation() {
        let err = ApiError::ResourceExhausted("no capacity".into());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.suggested_remediation().is_some());
    }

    #[test]
    fn repo_unique_violation_becomes_conflict() {
        let err: ApiError = crate::repo::RepoError::Unique("dup".into()).into();
        assert!(matches!(err, ApiError::ConflictError(_)));
    }

    #[test]
    fn objstore_not_found_becomes_api_not_found() {
        let err: ApiError = crate::objstore::ObjStoreError::NotFound("key".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
