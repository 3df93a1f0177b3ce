//! OpenAPI specification generation for the beaconscan API.
//!
//! The document is served at `/api/openapi.json`, rendered by Swagger UI at
//! `/swagger-ui`, and written to disk by the `gen-openapi` binary.

use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::regions::{RegionDetailResponse, RegionsResponse};
use super::scan::{BeaconsResponse, StatusResponse};
use beaconscan_core::{Beacon, PermissionState, Phase, RadioState, Region, SessionFault};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for beaconscan.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beaconscan API",
        version = "0.1.0",
        description = r#"
# beaconscan API

beaconscan ranges for iBeacons in a fixed set of regions and reports what it sees.

## Overview

Ranging only runs while two preconditions hold:

1. **Location permission** has been granted. It is requested once at startup.
2. **The Bluetooth radio is on**, as confirmed by at least one report from the adapter.

No start or stop decision is made until the first radio report arrives. After that, every
permission or radio change starts or stops ranging as needed.

## Reading results

- **getStatus**: the coordinator phase, both preconditions, and whether ranging is live.
- **getBeacons**: the visible beacons, grouped by region in configured order.
- **listRegions** / **getRegion**: the configured regions.

`startScan` and `stopScan` send the same commands the coordinator issues itself; starting is
ignored unless both preconditions hold.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beaconscan server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "scan",
            description = "Scan status, visible beacons, and ranging control"
        ),
        (
            name = "regions",
            description = "Configured ranging regions"
        )
    ),
    paths(
        super::health::health_check,
        super::scan::get_status,
        super::scan::get_beacons,
        super::scan::start_scan,
        super::scan::stop_scan,
        super::regions::list_regions,
        super::regions::get_region,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Scan types
            StatusResponse,
            BeaconsResponse,
            Phase,
            PermissionState,
            RadioState,
            SessionFault,
            Beacon,
            // Region types
            Region,
            RegionsResponse,
            RegionDetailResponse,
        )
    )
)]
pub struct ApiDoc;
