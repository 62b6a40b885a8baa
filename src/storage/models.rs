use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::Quality;

/// Category of an uploaded asset, which decides its allow-list and size ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Audio,
    Document,
    Image,
    Video,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Audio => "audio",
            AssetKind::Document => "document",
            AssetKind::Image => "image",
            AssetKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "audio" => Some(AssetKind::Audio),
            "document" => Some(AssetKind::Document),
            "image" | "thumbnail" => Some(AssetKind::Image),
            "video" => Some(AssetKind::Video),
            _ => None,
        }
    }

    /// Derive a kind from a MIME type string. Unknown binaries have no kind.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let primary = mime_type.split('/').next().unwrap_or("");
        match primary {
            "audio" => Some(AssetKind::Audio),
            "image" => Some(AssetKind::Image),
            "video" => Some(AssetKind::Video),
            "text" | "application" => {
                let sub = mime_type.split('/').nth(1).unwrap_or("");
                match sub {
                    "pdf"
                    | "msword"
                    | "rtf"
                    | "csv"
                    | "zip"
                    | "vnd.openxmlformats-officedocument.wordprocessingml.document"
                    | "vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                    | "vnd.openxmlformats-officedocument.presentationml.presentation"
                    | "vnd.ms-excel"
                    | "vnd.ms-powerpoint" => Some(AssetKind::Document),
                    _ if primary == "text" => Some(AssetKind::Document),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// An uploaded asset and every rendition stored for it.
///
/// `original_key` never changes once written; variants may be added later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub id: String,
    pub kind: AssetKind,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub original_key: String,
    #[serde(default)]
    pub quality_variants: BTreeMap<Quality, String>,
    #[serde(default)]
    pub thumbnail_key: Option<String>,
    /// Requested variants that could not be produced.
    #[serde(default)]
    pub failed_variants: Vec<Quality>,
    pub uploaded_at: DateTime<Utc>,
}

impl StoredAsset {
    /// Every object key this asset owns.
    pub fn object_keys(&self) -> Vec<String> {
        let mut keys = vec![self.original_key.clone()];
        keys.extend(self.quality_variants.values().cloned());
        keys.extend(self.thumbnail_key.clone());
        keys
    }

    /// Best stored variant not above `ceiling`.
    pub fn variant_for(&self, ceiling: Quality) -> Option<(Quality, &str)> {
        self.quality_variants
            .range(..=ceiling)
            .next_back()
            .map(|(q, key)| (*q, key.as_str()))
    }
}
