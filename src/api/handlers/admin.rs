use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::delivery::Viewer;
use crate::policy::{CostReport, BYTES_PER_GB};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct DeliveryStatusResponse {
    pub emergency_active: bool,
    pub emergency_since: Option<String>,
    pub active_sessions: usize,
    pub active_streams: u64,
    pub bandwidth_today_gb: f64,
    pub signing_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct EmergencyResponse {
    pub active: bool,
    pub changed: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn delivery_status(
    State(state): State<Arc<AppState>>,
) -> Json<JSend<DeliveryStatusResponse>> {
    let engine = state.delivery.engine();
    let today = Utc::now().date_naive();

    JSend::success(DeliveryStatusResponse {
        emergency_active: engine.emergency().is_active(),
        emergency_since: engine.emergency().activated_at().map(|t| t.to_rfc3339()),
        active_sessions: state.delivery.active_sessions(),
        active_streams: engine.usage().total_active_streams(),
        bandwidth_today_gb: engine.usage().total_for_day(today) as f64 / BYTES_PER_GB,
        signing_configured: state.config.signing.token_secret.is_some(),
    })
}

pub async fn set_emergency(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    AppJson(req): AppJson<EmergencyRequest>,
) -> Result<Json<JSend<EmergencyResponse>>, ApiError> {
    require_admin(&viewer)?;
    let engine = state.delivery.engine();

    let changed = if req.active {
        engine.enable_emergency_mode()
    } else {
        let changed = engine.disable_emergency_mode();
        if changed {
            engine.notify_disabled().await;
        }
        changed
    };

    tracing::warn!(user_id = %viewer.user_id, active = req.active, changed, "Emergency mode set manually");
    Ok(JSend::success(EmergencyResponse {
        active: engine.emergency().is_active(),
        changed,
    }))
}

pub async fn run_cost_monitor(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
) -> Result<Json<JSend<CostReport>>, ApiError> {
    require_admin(&viewer)?;
    let report = state
        .delivery
        .engine()
        .monitor_daily_costs()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Cost monitor failed");
            ApiError::unavailable("Revenue data unavailable")
        })?;
    Ok(JSend::success(report))
}

fn require_admin(viewer: &Viewer) -> Result<(), ApiError> {
    if viewer.role == "admin" {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin role required"))
    }
}
