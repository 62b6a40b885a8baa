use axum::extract::{Multipart, Path, State};
use axum::Json;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::io::StreamReader;

use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::delivery::Viewer;
use crate::media::Quality;
use crate::object_store::ObjectEntry;
use crate::storage::models::{AssetKind, StoredAsset};
use crate::upload::UploadRequest;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AssetResponse {
    pub id: String,
    pub kind: AssetKind,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub original_url: String,
    pub variants: BTreeMap<Quality, String>,
    pub thumbnail_url: Option<String>,
    pub failed_variants: Vec<Quality>,
    pub uploaded_at: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedAssetResponse {
    pub id: String,
    pub removed_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddVariantRequest {
    pub quality: Quality,
}

#[derive(Debug, Deserialize)]
pub struct ListStorageParams {
    #[serde(default)]
    pub folder: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Multipart upload. Text fields (`kind`, `qualities`) must precede the
/// `file` field, whose body is streamed to disk without buffering.
pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    mut multipart: Multipart,
) -> Result<Json<JSend<AssetResponse>>, ApiError> {
    require_uploader(&viewer)?;

    let mut kind = AssetKind::Video;
    let mut qualities: Vec<Quality> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "kind" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid kind: {e}")))?;
                kind = AssetKind::parse(text.trim())
                    .ok_or_else(|| ApiError::bad_request(format!("Unknown asset kind '{text}'")))?;
            }
            "qualities" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid qualities: {e}")))?;
                qualities = parse_qualities(&text)?;
            }
            "file" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| ApiError::bad_request("file field must carry a file name"))?;

                let mut request = UploadRequest::new(&file_name, kind).with_qualities(&qualities);
                if let Some(content_type) = field.content_type() {
                    request = request.with_content_type(content_type);
                }

                let body = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
                let reader = StreamReader::new(Box::pin(body));

                let asset = state.uploads.accept_upload(reader, request).await?;
                tracing::info!(
                    user_id = %viewer.user_id,
                    asset_id = %asset.id,
                    file_name = %asset.file_name,
                    "Asset uploaded"
                );
                return Ok(JSend::success(asset_to_response(&state, &asset)));
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    Err(ApiError::bad_request("file field is required"))
}

/// Raw object URLs bypass signing, so only uploaders may see them. Viewers
/// get playback URLs from `POST /streams`.
pub async fn get_asset(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Json<JSend<AssetResponse>>, ApiError> {
    require_uploader(&viewer)?;

    let asset = state
        .catalog
        .get_asset(&id)?
        .ok_or_else(|| ApiError::not_found("Asset not found"))?;

    Ok(JSend::success(asset_to_response(&state, &asset)))
}

pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Json<JSend<DeletedAssetResponse>>, ApiError> {
    require_uploader(&viewer)?;

    let asset = state
        .uploads
        .delete_asset(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset not found"))?;

    tracing::info!(user_id = %viewer.user_id, asset_id = %id, "Asset removed by uploader");
    Ok(JSend::success(DeletedAssetResponse {
        removed_keys: asset.object_keys(),
        id: asset.id,
    }))
}

pub async fn add_variant(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(id): Path<String>,
    AppJson(req): AppJson<AddVariantRequest>,
) -> Result<Json<JSend<AssetResponse>>, ApiError> {
    require_uploader(&viewer)?;

    let asset = state
        .uploads
        .add_variant(&id, req.quality)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset not found"))?;

    tracing::debug!(asset_id = %id, quality = %req.quality, "Added variant");
    Ok(JSend::success(asset_to_response(&state, &asset)))
}

pub async fn list_storage_files(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    AppQuery(params): AppQuery<ListStorageParams>,
) -> Result<Json<JSend<Vec<ObjectEntry>>>, ApiError> {
    require_uploader(&viewer)?;
    let entries = state.storage.list_files(&params.folder).await?;
    Ok(JSend::success(entries))
}

// ============================================================================
// Helpers
// ============================================================================

fn require_uploader(viewer: &Viewer) -> Result<(), ApiError> {
    match viewer.role.as_str() {
        "admin" | "instructor" => Ok(()),
        _ => Err(ApiError::forbidden("Instructor or admin role required")),
    }
}

fn parse_qualities(text: &str) -> Result<Vec<Quality>, ApiError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Quality::parse(s).ok_or_else(|| ApiError::bad_request(format!("Unknown quality '{s}'")))
        })
        .collect()
}

fn asset_to_response(state: &AppState, asset: &StoredAsset) -> AssetResponse {
    AssetResponse {
        id: asset.id.clone(),
        kind: asset.kind,
        file_name: asset.file_name.clone(),
        mime_type: asset.mime_type.clone(),
        byte_size: asset.byte_size,
        original_url: state.storage.url_for(&asset.original_key),
        variants: asset
            .quality_variants
            .iter()
            .map(|(q, key)| (*q, state.storage.url_for(key)))
            .collect(),
        thumbnail_url: asset.thumbnail_key.as_deref().map(|k| state.storage.url_for(k)),
        failed_variants: asset.failed_variants.clone(),
        uploaded_at: asset.uploaded_at.to_rfc3339(),
    }
}
