//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `scan` - Scan status, visible beacons, and start/stop commands
//! - `regions` - Configured ranging regions
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod regions;
pub mod scan;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                     - Health check
/// /swagger-ui                 - Interactive API documentation
/// /api
/// ├── /status                 - Coordinator phase and preconditions
/// ├── /beacons                - Visible beacon set
/// ├── /regions                - Configured regions
/// │   └── /{identifier}       - One region and its beacons
/// ├── /scan/start             - Request ranging start
/// ├── /scan/stop              - Request ranging stop
/// └── /openapi.json           - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/status", get(scan::get_status))
                .route("/beacons", get(scan::get_beacons))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/regions", regions::router())
                .nest("/scan", scan::router()),
        )
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use beaconscan_core::{
        Beacon, Collaborators, Coordinator, MockPermission, MockRadio, MockRadioHandle,
        MockRanging, MockRangingHandle, PermissionGrant, Phase, RadioState, RangingBatch, Region,
        RegionSet, ScanStatus,
    };
    use uuid::Uuid;

    use crate::api::health::HealthResponse;
    use crate::api::regions::{RegionDetailResponse, RegionsResponse};
    use crate::api::scan::{BeaconsResponse, StatusResponse};
    use crate::state::AppState;

    const KEY: Uuid = Uuid::from_u128(0xf782_6da6_4fa2_4e98_8024_bc5b_71e0_893e);

    struct Harness {
        server: TestServer,
        coordinator: Coordinator,
        radio: MockRadioHandle,
        ranging: MockRangingHandle,
    }

    impl Harness {
        /// Coordinator with permission granted and the radio on, ranging live.
        async fn scanning() -> Self {
            let harness = Self::new(PermissionGrant::Granted).await;
            harness.radio.set(RadioState::On);
            harness.wait_for(|s| s.scanning).await;
            harness
        }

        async fn new(grant: PermissionGrant) -> Self {
            let regions = RegionSet::new(vec![
                Region::new("desk", KEY).with_major(2),
                Region::new("lobby", KEY),
            ])
            .unwrap();

            let (permission, permission_handle) = MockPermission::new();
            let (radio, radio_handle) = MockRadio::new();
            let (ranging, ranging_handle) = MockRanging::new();
            permission_handle.resolve(grant);

            let coordinator = Coordinator::spawn(
                regions.clone(),
                Collaborators {
                    permission: Arc::new(permission),
                    radio: Arc::new(radio),
                    ranging: Arc::new(ranging),
                },
            );
            let state = AppState::shared(coordinator.handle(), regions);
            let server = TestServer::new(create_router(state)).unwrap();

            Self {
                server,
                coordinator,
                radio: radio_handle,
                ranging: ranging_handle,
            }
        }

        async fn wait_for(&self, predicate: impl Fn(&ScanStatus) -> bool) -> ScanStatus {
            let mut status = self.coordinator.handle().subscribe();
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let snapshot = status.borrow_and_update().clone();
                    if predicate(&snapshot) {
                        return snapshot;
                    }
                    status.changed().await.unwrap();
                }
            })
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn test_health_reports_phase() {
        let harness = Harness::new(PermissionGrant::Granted).await;
        harness
            .wait_for(|s| s.phase == Phase::AwaitingFirstRadioState)
            .await;

        let response = harness.server.get("/health").await;
        response.assert_status_ok();
        let body: HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert_eq!(body.phase, Phase::AwaitingFirstRadioState);
    }

    #[tokio::test]
    async fn test_status_while_scanning() {
        let harness = Harness::scanning().await;

        let body: StatusResponse = harness.server.get("/api/status").await.json();
        assert_eq!(body.phase, Phase::Ready);
        assert!(body.can_scan);
        assert!(body.scanning);
        assert_eq!(body.beacon_count, 0);
        assert!(body.fault.is_none());
    }

    #[tokio::test]
    async fn test_beacons_in_region_order() {
        let harness = Harness::scanning().await;
        harness.ranging.send_batch(RangingBatch::new(
            "lobby",
            vec![Beacon::new(KEY).with_major(9).with_minor(1)],
        ));
        harness.ranging.send_batch(RangingBatch::new(
            "desk",
            vec![Beacon::new(KEY).with_major(2).with_minor(5).with_rssi(-60)],
        ));
        harness.wait_for(|s| s.beacons.len() == 2).await;

        let body: BeaconsResponse = harness.server.get("/api/beacons").await.json();
        assert!(body.scanning);
        let majors: Vec<Option<u16>> = body.beacons.iter().map(|b| b.major).collect();
        assert_eq!(majors, [Some(2), Some(9)]);

        let desk: RegionDetailResponse = harness.server.get("/api/regions/desk").await.json();
        assert_eq!(desk.position, 0);
        assert_eq!(desk.beacons.len(), 1);
        assert_eq!(desk.beacons[0].rssi, Some(-60));
    }

    #[tokio::test]
    async fn test_region_detail_follows_reported_region() {
        let harness = Harness::scanning().await;
        harness.ranging.send_batch(RangingBatch::new(
            "lobby",
            vec![Beacon::new(KEY).with_major(2).with_minor(3)],
        ));
        harness.wait_for(|s| s.beacons.len() == 1).await;

        let lobby: RegionDetailResponse = harness.server.get("/api/regions/lobby").await.json();
        assert_eq!(lobby.position, 1);
        assert_eq!(lobby.beacons.len(), 1);
        assert_eq!(lobby.beacons[0].minor, Some(3));

        let desk: RegionDetailResponse = harness.server.get("/api/regions/desk").await.json();
        assert!(desk.beacons.is_empty());
    }

    #[tokio::test]
    async fn test_regions_listed_in_order() {
        let harness = Harness::new(PermissionGrant::Granted).await;

        let body: RegionsResponse = harness.server.get("/api/regions").await.json();
        let names: Vec<&str> = body.regions.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(names, ["desk", "lobby"]);
    }

    #[tokio::test]
    async fn test_unknown_region_is_not_found() {
        let harness = Harness::new(PermissionGrant::Granted).await;

        let response = harness.server.get("/api/regions/attic").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "REGION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_stop_then_start() {
        let harness = Harness::scanning().await;

        let stopped: StatusResponse = harness.server.post("/api/scan/stop").await.json();
        assert!(!stopped.scanning);
        assert_eq!(harness.ranging.live_subscriptions(), 0);

        let started: StatusResponse = harness.server.post("/api/scan/start").await.json();
        assert!(started.scanning);
        assert_eq!(harness.ranging.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_start_ignored_when_permission_denied() {
        let harness = Harness::new(PermissionGrant::Denied).await;
        harness.radio.set(RadioState::On);
        harness.wait_for(|s| s.phase == Phase::Ready).await;

        let response = harness.server.post("/api/scan/start").await;
        response.assert_status_ok();
        let body: StatusResponse = response.json();
        assert!(!body.can_scan);
        assert!(!body.scanning);
        assert_eq!(harness.ranging.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_unavailable() {
        let harness = Harness::scanning().await;
        let Harness {
            server,
            coordinator,
            ranging,
            ..
        } = harness;

        let last = coordinator.shutdown().await;
        assert_eq!(last.phase, Phase::ShutDown);
        assert_eq!(ranging.live_subscriptions(), 0);

        let response = server.post("/api/scan/start").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "COORDINATOR_SHUT_DOWN");

        let health: HealthResponse = server.get("/health").await.json();
        assert_eq!(health.status, "shutting_down");
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let harness = Harness::new(PermissionGrant::Granted).await;

        let response = harness.server.get("/api/openapi.json").await;
        response.assert_status_ok();
        assert!(response.text().contains("beaconscan API"));
    }
}
