//! Region endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use beaconscan_core::{Beacon, Region};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Configured regions response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegionsResponse {
    /// Regions in presentation order.
    pub regions: Vec<Region>,
}

/// One region and the beacons currently ranged in it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegionDetailResponse {
    /// The region.
    pub region: Region,

    /// Position of the region in presentation order.
    #[schema(example = 0)]
    pub position: usize,

    /// Visible beacons from this region's latest ranging batch.
    pub beacons: Vec<Beacon>,
}

/// Creates the regions router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_regions))
        .route("/{identifier}", get(get_region))
}

/// List the configured regions.
#[utoipa::path(
    get,
    path = "/api/regions",
    tag = "regions",
    operation_id = "listRegions",
    summary = "List ranging regions",
    description = "Returns the regions ranging is performed for. Their order is the order in \
        which beacons are presented.",
    responses(
        (status = 200, description = "Configured regions", body = RegionsResponse)
    )
)]
pub async fn list_regions(State(state): State<SharedState>) -> Json<RegionsResponse> {
    Json(RegionsResponse {
        regions: state.regions().as_slice().to_vec(),
    })
}

/// Get one region with its visible beacons.
#[utoipa::path(
    get,
    path = "/api/regions/{identifier}",
    tag = "regions",
    operation_id = "getRegion",
    summary = "Get a ranging region",
    description = "Returns the region, its position in presentation order and the beacons \
        from its latest ranging batch.",
    params(
        ("identifier" = String, Path, description = "Region identifier")
    ),
    responses(
        (status = 200, description = "Region found", body = RegionDetailResponse),
        (status = 404, description = "No such region", body = super::error::ErrorResponse)
    )
)]
pub async fn get_region(
    State(state): State<SharedState>,
    Path(identifier): Path<String>,
) -> ApiResult<Json<RegionDetailResponse>> {
    let regions = state.regions();
    let position = regions
        .position(&identifier)
        .ok_or_else(|| ApiError::region_not_found(&identifier))?;
    let region = regions.as_slice()[position].clone();

    let beacons = state
        .status()
        .by_region
        .into_iter()
        .find(|group| group.region == region.identifier)
        .map(|group| group.beacons)
        .unwrap_or_default();

    Ok(Json(RegionDetailResponse {
        region,
        position,
        beacons,
    }))
}
