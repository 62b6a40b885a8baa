use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::delivery::{StreamGrant, StreamProgress, Viewer};
use crate::media::Quality;
use crate::policy::SessionSummary;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub asset_id: String,
    #[serde(default)]
    pub watched_seconds: u64,
    #[serde(default)]
    pub quality: Option<Quality>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    #[serde(default)]
    pub bytes_transferred: u64,
    /// Playback position; when present the quality ladder is re-evaluated.
    #[serde(default)]
    pub watched_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FinishStreamRequest {
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default = "default_completed")]
    pub completed: bool,
}

fn default_completed() -> bool {
    true
}

pub async fn start_stream(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    AppJson(req): AppJson<StartStreamRequest>,
) -> Result<Json<JSend<StreamGrant>>, ApiError> {
    if req.asset_id.trim().is_empty() {
        return Err(ApiError::bad_request("asset_id must not be empty"));
    }

    let grant = state
        .delivery
        .start_stream(&viewer, &req.asset_id, req.watched_seconds, req.quality)
        .await?;
    Ok(JSend::success(grant))
}

pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<ProgressRequest>,
) -> Result<Json<JSend<StreamProgress>>, ApiError> {
    let progress = state.delivery.report_progress(
        id,
        &viewer.user_id,
        req.bytes_transferred,
        req.watched_seconds,
    )?;
    Ok(JSend::success(progress))
}

pub async fn finish_stream(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<FinishStreamRequest>,
) -> Result<Json<JSend<SessionSummary>>, ApiError> {
    let summary =
        state
            .delivery
            .finish_stream(id, &viewer.user_id, req.bytes_transferred, req.completed)?;

    if let Some(warning) = &summary.warning {
        tracing::info!(
            user_id = %viewer.user_id,
            percent_used = warning.percent_used,
            "Viewer crossed usage advisory threshold"
        );
    }
    Ok(JSend::success(summary))
}
