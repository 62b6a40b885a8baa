mod client;
mod edge;
mod local;

pub use client::{StorageClient, UploadedFile};
pub use edge::EdgeStore;
pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Storage upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Storage transport error: {0}")]
    Transport(String),
}

impl ObjectStoreError {
    /// Server-side and transport failures may succeed on retry; client errors never do.
    pub fn is_transient(&self) -> bool {
        match self {
            ObjectStoreError::Upstream { status, .. } => *status >= 500,
            ObjectStoreError::Transport(_) => true,
            _ => false,
        }
    }
}

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub is_directory: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Abstraction over object storage backends. Keys are slash-separated paths
/// without a leading slash.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, ObjectStoreError>;

    /// Store the file at `path` under `key`. The default buffers the whole
    /// file; backends that can stream override it.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), ObjectStoreError> {
        let data = tokio::fs::read(path).await?;
        self.put(key, Bytes::from(data)).await
    }

    /// Download `key` into the file at `path`.
    async fn get_to_file(&self, key: &str, path: &Path) -> Result<(), ObjectStoreError> {
        let data = self.get(key).await?;
        tokio::fs::write(path, &data).await?;
        Ok(())
    }
}
