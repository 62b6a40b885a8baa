use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use thiserror::Error;

use super::{Quality, TranscodeError, Transcoder};
use crate::object_store::{ObjectStoreError, StorageClient};

pub const ORIGINALS_PREFIX: &str = "originals";
pub const VARIANTS_PREFIX: &str = "videos";
pub const THUMBNAILS_PREFIX: &str = "thumbnails";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] ObjectStoreError),
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailSettings {
    /// Fraction of the duration at which the frame is taken.
    pub offset: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            offset: 0.1,
            width: 1280,
            height: 720,
        }
    }
}

/// Turns one local source file into stored renditions.
///
/// Every intermediate lives in a [`TempPath`] under `scratch_dir`, so it is
/// removed when the method returns, whether it succeeded, failed, or was
/// cancelled.
#[derive(Clone)]
pub struct TranscodingPipeline {
    storage: StorageClient,
    transcoder: Arc<dyn Transcoder>,
    scratch_dir: PathBuf,
    thumbnail: ThumbnailSettings,
}

impl TranscodingPipeline {
    pub fn new(
        storage: StorageClient,
        transcoder: Arc<dyn Transcoder>,
        scratch_dir: impl Into<PathBuf>,
        thumbnail: ThumbnailSettings,
    ) -> Self {
        Self {
            storage,
            transcoder,
            scratch_dir: scratch_dir.into(),
            thumbnail,
        }
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn original_key(asset_id: &str, file_name: &str) -> String {
        format!("{ORIGINALS_PREFIX}/{asset_id}/{file_name}")
    }

    pub fn variant_key(asset_id: &str, quality: Quality) -> String {
        format!("{VARIANTS_PREFIX}/{asset_id}/{}.mp4", quality.as_str())
    }

    pub fn thumbnail_key(asset_id: &str) -> String {
        format!("{THUMBNAILS_PREFIX}/{asset_id}.jpg")
    }

    /// Create an empty scratch file that is deleted when the handle drops.
    pub fn scratch_file(&self, prefix: &str, suffix: &str) -> Result<TempPath, std::io::Error> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.scratch_dir)?;
        Ok(file.into_temp_path())
    }

    /// Upload the untouched source.
    pub async fn upload_original(
        &self,
        local_path: &Path,
        asset_id: &str,
        file_name: &str,
    ) -> Result<String, PipelineError> {
        let key = Self::original_key(asset_id, file_name);
        self.storage.put_file(local_path, &key).await?;
        tracing::info!(asset_id, key = %key, "Uploaded original");
        Ok(key)
    }

    /// Re-encode to `quality`'s preset and upload the result.
    pub async fn generate_quality_variant(
        &self,
        local_path: &Path,
        asset_id: &str,
        quality: Quality,
    ) -> Result<String, PipelineError> {
        let output = self.scratch_file(&format!("{asset_id}-{quality}-"), ".mp4")?;

        self.transcoder
            .encode_variant(local_path, &output, &quality.preset())
            .await?;

        let key = Self::variant_key(asset_id, quality);
        self.storage.put_file(&output, &key).await?;

        tracing::info!(asset_id, quality = %quality, key = %key, "Uploaded quality variant");
        Ok(key)
    }

    /// Extract one frame at the configured offset, crop it to the canvas and upload it.
    pub async fn generate_thumbnail(
        &self,
        local_path: &Path,
        asset_id: &str,
    ) -> Result<String, PipelineError> {
        let duration = self.transcoder.probe_duration(local_path).await?;
        let at_seconds = duration * self.thumbnail.offset;

        let output = self.scratch_file(&format!("{asset_id}-thumb-"), ".jpg")?;
        self.transcoder
            .extract_frame(
                local_path,
                &output,
                at_seconds,
                self.thumbnail.width,
                self.thumbnail.height,
            )
            .await?;

        let key = Self::thumbnail_key(asset_id);
        self.storage.put_file(&output, &key).await?;

        tracing::info!(asset_id, key = %key, at_seconds, "Uploaded thumbnail");
        Ok(key)
    }
}
