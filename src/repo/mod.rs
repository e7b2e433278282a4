pub mod execution_repo;
pub mod runtime_node_repo;
pub mod session_repo;
pub mod template_repo;

pub use execution_repo::ExecutionRepo;
pub use runtime_node_repo::RuntimeNodeRepo;
pub use session_repo::SessionRepo;
pub use template_repo::TemplateRepo;

use thiserror::Error;

/// Errors surfaced by the repository layer. Repositories are pure adapters:
/// they translate `sqlx::Error` into this taxonomy and never enforce
/// business rules themselves.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unique constraint violation: {0}")]
    Unique(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if code == "23000" || code == "1062" {
                return RepoError::Unique(db_err.message().to_string());
            }
        }
    }
    RepoError::Database(err)
}
