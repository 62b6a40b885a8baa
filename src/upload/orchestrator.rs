use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{validate_file, UploadError, UploadLimits, ValidationError};
use crate::media::{PipelineError, Quality, TranscodingPipeline};
use crate::storage::models::{AssetKind, StoredAsset};
use crate::storage::Database;

const SPOOL_CHUNK: usize = 64 * 1024;

/// What the caller declares about an incoming file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub kind: AssetKind,
    pub content_type: Option<String>,
    pub declared_size: Option<u64>,
    /// Renditions to produce for videos. Ignored for other kinds.
    pub qualities: Vec<Quality>,
}

impl UploadRequest {
    pub fn new(file_name: &str, kind: AssetKind) -> Self {
        Self {
            file_name: file_name.to_string(),
            kind,
            content_type: None,
            declared_size: None,
            qualities: Vec::new(),
        }
    }

    pub fn with_qualities(mut self, qualities: &[Quality]) -> Self {
        self.qualities = qualities.to_vec();
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

// Stage artifacts. Each stage consumes the previous artifact and either
// produces the next one or stops the chain.

struct ValidatedUpload {
    asset_id: String,
    file_name: String,
    mime_type: String,
    kind: AssetKind,
    limit: u64,
    qualities: Vec<Quality>,
}

/// The request body on local disk. The file is removed when this drops.
struct SpooledFile {
    path: TempPath,
    byte_size: u64,
}

struct Renditions {
    variants: BTreeMap<Quality, String>,
    failed: Vec<Quality>,
    thumbnail: Option<String>,
}

/// Drives validation, spooling, transcoding and cataloguing of one upload.
#[derive(Clone)]
pub struct UploadOrchestrator {
    pipeline: TranscodingPipeline,
    catalog: Database,
    limits: UploadLimits,
}

impl UploadOrchestrator {
    pub fn new(pipeline: TranscodingPipeline, catalog: Database, limits: UploadLimits) -> Self {
        Self {
            pipeline,
            catalog,
            limits,
        }
    }

    pub fn pipeline(&self) -> &TranscodingPipeline {
        &self.pipeline
    }

    /// Accept one upload end to end.
    ///
    /// Nothing is sent to storage until validation passes. The spooled file and
    /// every encoder intermediate are gone by the time this returns, and objects
    /// already uploaded are deleted again if a later stage fails.
    pub async fn accept_upload<R>(
        &self,
        reader: R,
        request: UploadRequest,
    ) -> Result<StoredAsset, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let validated = self.validate(&request)?;
        let spooled = self.spool(reader, &validated).await?;

        let mut uploaded = Vec::new();
        let result = self.process(&validated, &spooled, &mut uploaded).await;
        drop(spooled);

        if let Err(ref e) = result {
            tracing::warn!(asset_id = %validated.asset_id, error = %e, "Upload failed, rolling back");
            self.remove_objects(&uploaded).await;
        }
        result
    }

    fn validate(&self, request: &UploadRequest) -> Result<ValidatedUpload, ValidationError> {
        let (file_name, mime_type) = validate_file(
            &request.file_name,
            request.kind,
            request.content_type.as_deref(),
            request.declared_size,
            &self.limits,
        )?;

        let mut qualities = if request.kind == AssetKind::Video {
            request.qualities.clone()
        } else {
            Vec::new()
        };
        qualities.sort();
        qualities.dedup();

        Ok(ValidatedUpload {
            asset_id: uuid::Uuid::new_v4().to_string(),
            file_name,
            mime_type,
            kind: request.kind,
            limit: self.limits.limit(request.kind),
            qualities,
        })
    }

    /// Stream the body into a scratch file, enforcing the size ceiling as it goes.
    async fn spool<R>(&self, mut reader: R, upload: &ValidatedUpload) -> Result<SpooledFile, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let extension = upload.file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("bin");
        let path = self
            .pipeline
            .scratch_file(&format!("{}-src-", upload.asset_id), &format!(".{extension}"))?;

        let mut file = tokio::fs::File::create(&path).await?;
        let mut buf = vec![0u8; SPOOL_CHUNK];
        let mut byte_size: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            byte_size += n as u64;
            if byte_size > upload.limit {
                return Err(ValidationError::TooLarge {
                    size: byte_size,
                    limit: upload.limit,
                    kind: upload.kind.as_str().to_string(),
                }
                .into());
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        drop(file);

        if byte_size == 0 {
            return Err(ValidationError::Empty.into());
        }

        tracing::debug!(asset_id = %upload.asset_id, byte_size, "Spooled upload");
        Ok(SpooledFile { path, byte_size })
    }

    async fn process(
        &self,
        upload: &ValidatedUpload,
        spooled: &SpooledFile,
        uploaded: &mut Vec<String>,
    ) -> Result<StoredAsset, UploadError> {
        let original_key = self.store_original(upload, &spooled.path, uploaded).await?;
        let renditions = self.transcode(upload, &spooled.path, uploaded).await?;

        let asset = StoredAsset {
            id: upload.asset_id.clone(),
            kind: upload.kind,
            file_name: upload.file_name.clone(),
            mime_type: upload.mime_type.clone(),
            byte_size: spooled.byte_size,
            original_key,
            quality_variants: renditions.variants,
            thumbnail_key: renditions.thumbnail,
            failed_variants: renditions.failed,
            uploaded_at: Utc::now(),
        };
        self.catalog.insert_asset(&asset)?;

        tracing::info!(
            asset_id = %asset.id,
            kind = asset.kind.as_str(),
            variants = asset.quality_variants.len(),
            failed = asset.failed_variants.len(),
            "Upload stored"
        );
        Ok(asset)
    }

    async fn store_original(
        &self,
        upload: &ValidatedUpload,
        local_path: &Path,
        uploaded: &mut Vec<String>,
    ) -> Result<String, UploadError> {
        let key = self
            .pipeline
            .upload_original(local_path, &upload.asset_id, &upload.file_name)
            .await?;
        uploaded.push(key.clone());
        Ok(key)
    }

    /// Produce the requested variants and a thumbnail. A failing variant is
    /// recorded and skipped; the stage fails only when every variant failed.
    async fn transcode(
        &self,
        upload: &ValidatedUpload,
        local_path: &Path,
        uploaded: &mut Vec<String>,
    ) -> Result<Renditions, UploadError> {
        let mut renditions = Renditions {
            variants: BTreeMap::new(),
            failed: Vec::new(),
            thumbnail: None,
        };
        if upload.kind != AssetKind::Video {
            return Ok(renditions);
        }

        for &quality in &upload.qualities {
            match self
                .pipeline
                .generate_quality_variant(local_path, &upload.asset_id, quality)
                .await
            {
                Ok(key) => {
                    uploaded.push(key.clone());
                    renditions.variants.insert(quality, key);
                }
                Err(e) => {
                    tracing::error!(
                        asset_id = %upload.asset_id,
                        quality = %quality,
                        error = %e,
                        "Quality variant failed"
                    );
                    renditions.failed.push(quality);
                }
            }
        }

        if !upload.qualities.is_empty() && renditions.variants.is_empty() {
            return Err(UploadError::NoVariants);
        }

        match self
            .pipeline
            .generate_thumbnail(local_path, &upload.asset_id)
            .await
        {
            Ok(key) => {
                uploaded.push(key.clone());
                renditions.thumbnail = Some(key);
            }
            Err(e) => {
                tracing::warn!(asset_id = %upload.asset_id, error = %e, "Thumbnail generation failed");
            }
        }

        Ok(renditions)
    }

    /// Best-effort delete of stored objects.
    async fn remove_objects(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.pipeline.storage().delete(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove stored object");
            }
        }
    }

    /// Produce one more variant for an existing video and record it.
    pub async fn add_variant(
        &self,
        asset_id: &str,
        quality: Quality,
    ) -> Result<Option<StoredAsset>, UploadError> {
        let Some(asset) = self.catalog.get_asset(asset_id)? else {
            return Ok(None);
        };
        if asset.kind != AssetKind::Video {
            return Err(ValidationError::UnsupportedContentType {
                mime_type: asset.mime_type,
                kind: AssetKind::Video.as_str().to_string(),
            }
            .into());
        }

        let extension = asset.file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("bin");
        let source = self
            .pipeline
            .scratch_file(&format!("{asset_id}-src-"), &format!(".{extension}"))?;
        self.pipeline
            .storage()
            .download(&asset.original_key, &source)
            .await
            .map_err(PipelineError::from)?;

        let key = self
            .pipeline
            .generate_quality_variant(&source, asset_id, quality)
            .await?;
        drop(source);

        // A re-encoded rendition overwrites the key the catalog already points at.
        let replaced = asset.quality_variants.contains_key(&quality);
        match self.catalog.add_variant(asset_id, quality, &key) {
            Ok(Some(updated)) => Ok(Some(updated)),
            Ok(None) => {
                tracing::warn!(asset_id, quality = %quality, "Asset was deleted while encoding a variant");
                self.remove_objects(std::slice::from_ref(&key)).await;
                Ok(None)
            }
            Err(e) => {
                if !replaced {
                    self.remove_objects(std::slice::from_ref(&key)).await;
                }
                Err(e.into())
            }
        }
    }

    /// Remove an asset from the catalog, then delete every object it owned.
    /// Returns the removed record, or `None` if there was no such asset.
    pub async fn delete_asset(&self, asset_id: &str) -> Result<Option<StoredAsset>, UploadError> {
        let Some(asset) = self.catalog.delete_asset(asset_id)? else {
            return Ok(None);
        };
        self.remove_objects(&asset.object_keys()).await;

        tracing::info!(asset_id, "Asset deleted");
        Ok(Some(asset))
    }
}
