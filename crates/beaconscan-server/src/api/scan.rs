//! Scan status and control endpoints.
//!
//! Everything here reads from or sends commands to the coordinator; no
//! handler touches the Bluetooth stack directly.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use beaconscan_core::{Beacon, PermissionState, Phase, RadioState, ScanStatus, SessionFault};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Scan status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "phase": "ready",
    "permission": "granted",
    "radio": "on",
    "can_scan": true,
    "scanning": true,
    "beacon_count": 2,
    "fault": null,
    "updated_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct StatusResponse {
    /// Coordinator lifecycle phase.
    pub phase: Phase,

    /// Location permission.
    pub permission: PermissionState,

    /// Radio power state.
    pub radio: RadioState,

    /// Whether permission and radio both allow scanning.
    #[schema(example = true)]
    pub can_scan: bool,

    /// Whether a ranging session is live.
    #[schema(example = true)]
    pub scanning: bool,

    /// Number of beacons currently visible.
    #[schema(example = 2)]
    pub beacon_count: usize,

    /// Last session failure, if any.
    #[schema(nullable)]
    pub fault: Option<SessionFault>,

    /// When the coordinator last published a change.
    #[schema(value_type = String, example = "2025-01-15T03:30:00Z")]
    pub updated_at_utc: DateTime<Utc>,
}

impl From<&ScanStatus> for StatusResponse {
    fn from(status: &ScanStatus) -> Self {
        Self {
            phase: status.phase,
            permission: status.permission,
            radio: status.radio,
            can_scan: status.can_scan(),
            scanning: status.scanning,
            beacon_count: status.beacons.len(),
            fault: status.fault.clone(),
            updated_at_utc: status.updated_at_utc,
        }
    }
}

/// Visible beacons response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconsResponse {
    /// Beacons in range, grouped by region in configured order.
    pub beacons: Vec<Beacon>,

    /// Whether a ranging session is live.
    #[schema(example = true)]
    pub scanning: bool,

    /// When the set last changed.
    #[schema(value_type = String, example = "2025-01-15T03:30:00Z")]
    pub updated_at_utc: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Creates the scan control router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start", post(start_scan))
        .route("/stop", post(stop_scan))
}

/// Get the current scan status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "scan",
    operation_id = "getStatus",
    summary = "Get scan status",
    description = "Returns the coordinator phase, the permission and radio states, whether \
        ranging is live, how many beacons are visible and the last session fault.",
    responses(
        (status = 200, description = "Current status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse::from(&state.status()))
}

/// Get the visible beacon set.
#[utoipa::path(
    get,
    path = "/api/beacons",
    tag = "scan",
    operation_id = "getBeacons",
    summary = "List visible beacons",
    description = "Returns the beacons currently in range. Beacons are grouped by region in \
        configured order; within a region they keep the order of the latest ranging report. \
        The list is empty whenever ranging is not live.",
    responses(
        (status = 200, description = "Visible beacons", body = BeaconsResponse)
    )
)]
pub async fn get_beacons(State(state): State<SharedState>) -> Json<BeaconsResponse> {
    let status = state.status();
    Json(BeaconsResponse {
        beacons: status.beacons,
        scanning: status.scanning,
        updated_at_utc: status.updated_at_utc,
    })
}

/// Ask the coordinator to start ranging.
#[utoipa::path(
    post,
    path = "/api/scan/start",
    tag = "scan",
    operation_id = "startScan",
    summary = "Start ranging",
    description = "Starts ranging if the coordinator is ready and both permission and radio \
        allow it. Otherwise nothing changes. Returns the status after the request was handled.",
    responses(
        (status = 200, description = "Request handled", body = StatusResponse),
        (status = 503, description = "Coordinator has shut down", body = super::error::ErrorResponse)
    )
)]
pub async fn start_scan(State(state): State<SharedState>) -> ApiResult<Json<StatusResponse>> {
    let status = state.coordinator().request_start().await?;
    Ok(Json(StatusResponse::from(&status)))
}

/// Ask the coordinator to stop ranging.
#[utoipa::path(
    post,
    path = "/api/scan/stop",
    tag = "scan",
    operation_id = "stopScan",
    summary = "Stop ranging",
    description = "Stops the live ranging session, if any, and clears the visible beacons. \
        Returns the status after the request was handled.",
    responses(
        (status = 200, description = "Request handled", body = StatusResponse),
        (status = 503, description = "Coordinator has shut down", body = super::error::ErrorResponse)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> ApiResult<Json<StatusResponse>> {
    let status = state.coordinator().request_stop().await?;
    Ok(Json(StatusResponse::from(&status)))
}
