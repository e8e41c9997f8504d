//! Object storage trait and implementations

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("invalid object location '{0}', expected s3://bucket/key")]
    InvalidLocation(String),
    #[error("object store io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Bucket + key, displayed as `s3://bucket/key`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || BlobError::InvalidLocation(url.to_string());
        let rest = url.trim().strip_prefix("s3://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    async fn get_at(&self, loc: &ObjectLocation) -> Result<Bytes> {
        self.get(&loc.bucket, &loc.key).await
    }
}

/// In-memory object store (for tests and local runs)
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<HashMap<(String, String), Bytes>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = data
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}

/// Objects as files under `<root>/<bucket>/<key>`.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        check_relative(bucket)?;
        check_relative(key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

/// Keys must stay below their bucket directory.
fn check_relative(part: &str) -> Result<()> {
    let ok = !part.is_empty()
        && Path::new(part)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(part.to_string()))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(path = %path.display(), bytes = body.len(), "writing object");
        tokio::fs::write(&path, &body).await?;
        Ok(())
    }
}
