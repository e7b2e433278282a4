use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::{ObjStoreError, ObjStoreResult, ObjStoreUri, ObjectInfo, ObjectStore, ListEntry};

/// Local-filesystem-backed object store, standing in for a real bucket SDK.
/// Bucket creation is implicit: directories are created on first upload.
pub struct LocalFsObjectStore {
    root: PathBuf,
    default_bucket: String,
}

impl LocalFsObjectStore {
    pub fn new(root: impl Into<PathBuf>, default_bucket: impl Into<String>) -> Self {
        Self { root: root.into(), default_bucket: default_bucket.into() }
    }

    fn path_for(&self, uri: &str) -> ObjStoreResult<PathBuf> {
        let parsed = ObjStoreUri::parse(uri, &self.default_bucket)?;
        Ok(self.root.join(parsed.bucket).join(parsed.key))
    }

    fn prefix_dir(&self, prefix: &str) -> ObjStoreResult<(PathBuf, String)> {
        let parsed = ObjStoreUri::parse(prefix, &self.default_bucket)?;
        Ok((self.root.join(&parsed.bucket), parsed.key))
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    async fn upload(&self, uri: &str, bytes: Vec<u8>, _content_type: &str) -> ObjStoreResult<()> {
        let path = self.path_for(uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn download(&self, uri: &str) -> ObjStoreResult<Vec<u8>> {
        let path = self.path_for(uri)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| ObjStoreError::NotFound(uri.to_string()))
    }

    async fn exists(&self, uri: &str) -> ObjStoreResult<bool> {
        let path = self.path_for(uri)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn info(&self, uri: &str) -> ObjStoreResult<ObjectInfo> {
        let path = self.path_for(uri)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ObjStoreError::NotFound(uri.to_string()))?;
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ObjectInfo {
            size: meta.len(),
            content_type: "application/octet-stream".to_string(),
            last_modified: modified,
            etag: format!("{:x}", meta.len()),
        })
    }

    async fn list(&self, prefix: &str, limit: usize) -> ObjStoreResult<Vec<ListEntry>> {
        let (bucket_root, key_prefix) = self.prefix_dir(prefix)?;
        let start = bucket_root.join(&key_prefix);
        let mut out = Vec::new();
        if !start.exists() {
            return Ok(out);
        }
        for entry in WalkDir::new(&start).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&bucket_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                let meta = entry.metadata().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                out.push(ListEntry {
                    key: rel,
                    size: meta.len(),
                    last_modified: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                    etag: format!("{:x}", meta.len()),
                });
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn delete(&self, uri: &str) -> ObjStoreResult<()> {
        let path = self.path_for(uri)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> ObjStoreResult<u64> {
        let (bucket_root, key_prefix) = self.prefix_dir(prefix)?;
        let start = bucket_root.join(&key_prefix);
        if !start.exists() {
            return Ok(0);
        }
        let mut count = 0u64;
        for entry in WalkDir::new(&start).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                count += 1;
            }
        }
        match tokio::fs::remove_dir_all(&start).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign(&self, uri: &str, _ttl_sec: u64) -> ObjStoreResult<String> {
        let path = self.path_for(uri)?;
        Ok(format!("file://{}", path.display()))
    }
}
