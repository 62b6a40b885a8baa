use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::StreamExt;
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{ObjectEntry, ObjectStore, ObjectStoreError};
use crate::config::StorageRegion;

/// Edge storage zone accessed over its REST API with an `AccessKey` header.
pub struct EdgeStore {
    base_url: String,
    zone: String,
    access_key: String,
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    object_name: String,
    #[serde(default)]
    length: u64,
    #[serde(default)]
    is_directory: bool,
    #[serde(default)]
    last_changed: Option<String>,
}

impl EdgeStore {
    pub fn new(
        region: StorageRegion,
        zone: &str,
        access_key: &str,
        max_retries: u32,
    ) -> Result<Self, ObjectStoreError> {
        Self::with_endpoint(
            &format!("https://{}", region.endpoint()),
            zone,
            access_key,
            max_retries,
        )
    }

    /// Point the store at an explicit endpoint (scheme + host).
    pub fn with_endpoint(
        base_url: &str,
        zone: &str,
        access_key: &str,
        max_retries: u32,
    ) -> Result<Self, ObjectStoreError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            zone: zone.trim_matches('/').to_string(),
            access_key: access_key.to_string(),
            client,
            max_retries,
            retry_backoff: Duration::from_millis(250),
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.zone, key.trim_start_matches('/'))
    }

    fn directory_url(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}/", self.base_url, self.zone)
        } else {
            format!("{}/{}/{}/", self.base_url, self.zone, prefix)
        }
    }

    /// GET an object, mapping 404 to `NotFound` and other failures to `Upstream`.
    async fn fetch(&self, key: &str) -> Result<Response, ObjectStoreError> {
        let url = self.object_url(key);
        let resp = self.execute("get", || Ok(self.client.get(&url))).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }
        Ok(resp)
    }

    /// Send a request, retrying transport failures and 5xx responses. Any
    /// response below 500 is handed back for the caller to classify.
    /// `build` runs once per attempt, so streamed bodies are reopened.
    async fn execute<F>(&self, op: &str, build: F) -> Result<Response, ObjectStoreError>
    where
        F: Fn() -> Result<RequestBuilder, ObjectStoreError>,
    {
        let mut attempt = 0;
        loop {
            let result = build()?
                .header("AccessKey", &self.access_key)
                .send()
                .await;

            let error = match result {
                Ok(resp) if !resp.status().is_server_error() => return Ok(resp),
                Ok(resp) => upstream_error(resp).await,
                Err(e) => ObjectStoreError::Transport(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            tracing::warn!(op, attempt, error = %error, "Transient storage failure, retrying");
            tokio::time::sleep(self.retry_backoff * attempt).await;
        }
    }
}

async fn upstream_error(resp: Response) -> ObjectStoreError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    ObjectStoreError::Upstream { status, message }
}

fn parse_last_changed(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[async_trait]
impl ObjectStore for EdgeStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key);
        let resp = self
            .execute("put", || {
                Ok(self
                    .client
                    .put(&url)
                    .header("Content-Type", "application/octet-stream")
                    .body(data.clone()))
            })
            .await?;

        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let resp = self.fetch(key).await?;
        resp.bytes()
            .await
            .map_err(|e| ObjectStoreError::Transport(e.to_string()))
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key);
        let length = tokio::fs::metadata(path).await?.len();
        let resp = self
            .execute("put", || {
                let file = tokio::fs::File::from_std(std::fs::File::open(path)?);
                Ok(self
                    .client
                    .put(&url)
                    .header("Content-Type", "application/octet-stream")
                    .header("Content-Length", length)
                    .body(Body::wrap_stream(ReaderStream::new(file))))
            })
            .await?;

        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }
        Ok(())
    }

    async fn get_to_file(&self, key: &str, path: &Path) -> Result<(), ObjectStoreError> {
        let resp = self.fetch(key).await?;

        let mut file = tokio::fs::File::create(path).await?;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ObjectStoreError::Transport(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key);
        let resp = self.execute("delete", || Ok(self.client.delete(&url))).await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(upstream_error(resp).await);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, ObjectStoreError> {
        let url = self.directory_url(prefix);
        let resp = self
            .execute("list", || {
                Ok(self.client.get(&url).header("Accept", "application/json"))
            })
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }

        let listed: Vec<ListedObject> = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Transport(format!("invalid listing: {e}")))?;

        let prefix = prefix.trim_matches('/');
        Ok(listed
            .into_iter()
            .map(|obj| ObjectEntry {
                key: if prefix.is_empty() {
                    obj.object_name
                } else {
                    format!("{prefix}/{}", obj.object_name)
                },
                size: obj.length,
                is_directory: obj.is_directory,
                last_modified: obj.last_changed.as_deref().and_then(parse_last_changed),
            })
            .collect())
    }
}
