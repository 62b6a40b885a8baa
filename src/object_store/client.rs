use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use super::{ObjectEntry, ObjectStore, ObjectStoreError};

/// Result of the folder-based upload surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedFile {
    pub url: String,
    pub file_name: String,
    pub folder: String,
}

/// Thin facade over an [`ObjectStore`] that knows the public URL of every key.
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl StorageClient {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: &str) -> Self {
        Self {
            store,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path.trim_start_matches('/'))
    }

    /// Store `bytes` at `path` and return its public URL.
    pub async fn put(&self, bytes: Bytes, path: &str) -> Result<String, ObjectStoreError> {
        let key = path.trim_start_matches('/');
        self.store.put(key, bytes).await?;
        tracing::debug!(key, "Stored object");
        Ok(self.url_for(key))
    }

    /// Stream the local file at `local_path` to `path` and return its public URL.
    pub async fn put_file(&self, local_path: &Path, path: &str) -> Result<String, ObjectStoreError> {
        let key = path.trim_start_matches('/');
        self.store.put_file(key, local_path).await?;
        tracing::debug!(key, "Stored object from file");
        Ok(self.url_for(key))
    }

    /// Download the object at `path` into `local_path`.
    pub async fn download(&self, path: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        self.store
            .get_to_file(path.trim_start_matches('/'), local_path)
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ObjectStoreError> {
        self.store.delete(path.trim_start_matches('/')).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, ObjectStoreError> {
        self.store.list(prefix).await
    }

    pub async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        folder: &str,
    ) -> Result<UploadedFile, ObjectStoreError> {
        let folder = folder.trim_matches('/').to_string();
        let url = self.put_file(local_path, &folder_key(&folder, name)).await?;
        Ok(UploadedFile {
            url,
            file_name: name.to_string(),
            folder,
        })
    }

    pub async fn upload_buffer(
        &self,
        bytes: Bytes,
        name: &str,
        folder: &str,
    ) -> Result<UploadedFile, ObjectStoreError> {
        let folder = folder.trim_matches('/').to_string();
        let url = self.put(bytes, &folder_key(&folder, name)).await?;
        Ok(UploadedFile {
            url,
            file_name: name.to_string(),
            folder,
        })
    }

    pub async fn delete_file(&self, name: &str, folder: &str) -> Result<(), ObjectStoreError> {
        self.delete(&folder_key(folder.trim_matches('/'), name)).await
    }

    pub async fn list_files(&self, folder: &str) -> Result<Vec<ObjectEntry>, ObjectStoreError> {
        self.list(folder.trim_matches('/')).await
    }
}

fn folder_key(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}
