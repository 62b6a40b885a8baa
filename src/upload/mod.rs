//! Upload validation and orchestration.

mod orchestrator;

pub use orchestrator::{UploadOrchestrator, UploadRequest};

use serde::Serialize;
use thiserror::Error;

use crate::media::PipelineError;
use crate::storage::models::AssetKind;
use crate::storage::DatabaseError;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// Reasons an upload is refused before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("file name is missing or invalid")]
    InvalidFileName,
    #[error("'.{extension}' files are not accepted for {kind} uploads")]
    UnsupportedExtension { extension: String, kind: String },
    #[error("content type '{mime_type}' is not accepted for {kind} uploads")]
    UnsupportedContentType { mime_type: String, kind: String },
    #[error("file is {size} bytes, the {kind} limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64, kind: String },
    #[error("file is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] DatabaseError),
    #[error("None of the requested quality variants could be produced")]
    NoVariants,
}

/// Size ceilings per asset kind, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub video: u64,
    pub image: u64,
    pub audio: u64,
    pub document: u64,
}

impl UploadLimits {
    pub fn limit(&self, kind: AssetKind) -> u64 {
        match kind {
            AssetKind::Video => self.video,
            AssetKind::Image => self.image,
            AssetKind::Audio => self.audio,
            AssetKind::Document => self.document,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            video: 5 * GB,
            image: 10 * MB,
            audio: 200 * MB,
            document: 50 * MB,
        }
    }
}

/// Accepted extensions and MIME types for a kind.
pub fn allowed_types(kind: AssetKind) -> (&'static [&'static str], &'static [&'static str]) {
    match kind {
        AssetKind::Video => (
            &["mp4", "mov", "m4v", "mkv", "webm", "avi"],
            &[
                "video/mp4",
                "video/quicktime",
                "video/x-m4v",
                "video/x-matroska",
                "video/webm",
                "video/x-msvideo",
            ],
        ),
        AssetKind::Image => (
            &["jpg", "jpeg", "png", "webp", "gif"],
            &["image/jpeg", "image/png", "image/webp", "image/gif"],
        ),
        AssetKind::Audio => (
            &["mp3", "m4a", "aac", "wav", "ogg", "flac"],
            &[
                "audio/mpeg",
                "audio/mp4",
                "audio/m4a",
                "audio/x-m4a",
                "audio/aac",
                "audio/wav",
                "audio/x-wav",
                "audio/ogg",
                "audio/flac",
                "audio/x-flac",
            ],
        ),
        AssetKind::Document => (
            &["pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "csv", "zip"],
            &[
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-powerpoint",
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "text/plain",
                "text/csv",
                "application/zip",
            ],
        ),
    }
}

/// Reduce a client-supplied name to a safe single path segment.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() || !cleaned.contains('.') {
        return None;
    }
    Some(cleaned)
}

/// Check name, extension, content type and declared size for `kind`.
/// Returns the sanitized file name and the MIME type to store.
pub fn validate_file(
    file_name: &str,
    kind: AssetKind,
    content_type: Option<&str>,
    declared_size: Option<u64>,
    limits: &UploadLimits,
) -> Result<(String, String), ValidationError> {
    let file_name = sanitize_file_name(file_name).ok_or(ValidationError::InvalidFileName)?;
    let (extensions, mime_types) = allowed_types(kind);

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !extensions.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedExtension {
            extension,
            kind: kind.as_str().to_string(),
        });
    }

    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    let mime_type = match declared {
        Some(ct) => ct,
        None => mime_guess::from_path(&file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    };
    if !mime_types.contains(&mime_type.as_str()) || AssetKind::from_mime(&mime_type) != Some(kind) {
        return Err(ValidationError::UnsupportedContentType {
            mime_type,
            kind: kind.as_str().to_string(),
        });
    }

    let limit = limits.limit(kind);
    match declared_size {
        Some(0) => return Err(ValidationError::Empty),
        Some(size) if size > limit => {
            return Err(ValidationError::TooLarge {
                size,
                limit,
                kind: kind.as_str().to_string(),
            })
        }
        _ => {}
    }

    Ok((file_name, mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(
            sanitize_file_name("../../etc/lesson 1.mp4").as_deref(),
            Some("lesson_1.mp4")
        );
        assert_eq!(sanitize_file_name("C:\\videos\\a.mov").as_deref(), Some("a.mov"));
        assert_eq!(sanitize_file_name("noextension"), None);
        assert_eq!(sanitize_file_name("..."), None);
    }

    #[test]
    fn test_video_accepts_mp4() {
        let (name, mime) =
            validate_file("intro.mp4", AssetKind::Video, None, Some(1024), &UploadLimits::default())
                .unwrap();
        assert_eq!(name, "intro.mp4");
        assert_eq!(mime, "video/mp4");
    }

    #[test]
    fn test_rejects_wrong_extension_for_kind() {
        let err = validate_file("intro.png", AssetKind::Video, None, None, &UploadLimits::default())
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedExtension { .. }));
    }

    #[test]
    fn test_rejects_mismatched_content_type() {
        let err = validate_file(
            "intro.mp4",
            AssetKind::Video,
            Some("application/x-msdownload"),
            None,
            &UploadLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedContentType { .. }));
    }

    #[test]
    fn test_thumbnail_ceiling() {
        let limits = UploadLimits::default();
        assert!(validate_file("t.jpg", AssetKind::Image, None, Some(10 * MB), &limits).is_ok());
        let err =
            validate_file("t.jpg", AssetKind::Image, None, Some(10 * MB + 1), &limits).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { limit, .. } if limit == 10 * MB));
    }
}
