pub mod local_fs;

pub use local_fs::LocalFsObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ObjStoreResult<T> = Result<T, ObjStoreError>;

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

/// `objstore://bucket/key` URIs. A missing bucket segment defaults to the
/// configured bucket.
pub struct ObjStoreUri {
    pub bucket: String,
    pub key: String,
}

impl ObjStoreUri {
    pub fn parse(uri: &str, default_bucket: &str) -> ObjStoreResult<Self> {
        let rest = uri
            .strip_prefix("objstore://")
            .ok_or_else(|| ObjStoreError::InvalidUri(uri.to_string()))?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Ok(Self {
                bucket: default_bucket.to_string(),
                key: rest.trim_start_matches('/').to_string(),
            }),
        }
    }
}

/// Upload/download/list/delete/presign for the workspace bucket. Bucket
/// creation is implicit on first upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, uri: &str, bytes: Vec<u8>, content_type: &str) -> ObjStoreResult<()>;
    async fn download(&self, uri: &str) -> ObjStoreResult<Vec<u8>>;
    async fn exists(&self, uri: &str) -> ObjStoreResult<bool>;
    async fn info(&self, uri: &str) -> ObjStoreResult<ObjectInfo>;
    async fn list(&self, prefix: &str, limit: usize) -> ObjStoreResult<Vec<ListEntry>>;
    async fn delete(&self, uri: &str) -> ObjStoreResult<()>;
    async fn delete_prefix(&self, prefix: &str) -> ObjStoreResult<u64>;
    async fn presign(&self, uri: &str, ttl_sec: u64) -> ObjStoreResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_key() {
        let u = ObjStoreUri::parse("objstore://tsbx/sessions/s1/file.txt", "default").unwrap();
        assert_eq!(u.bucket, "tsbx");
        assert_eq!(u.key, "sessions/s1/file.txt");
    }

    #[test]
    fn defaults_bucket_when_missing() {
        let u = ObjStoreUri::parse("objstore:///sessions/s1/file.txt", "default").unwrap();
        assert_eq!(u.bucket, "default");
    }
}
