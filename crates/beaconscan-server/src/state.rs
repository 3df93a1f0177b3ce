//! Application state shared across handlers.

use std::sync::Arc;

use beaconscan_core::{CoordinatorHandle, RegionSet, ScanStatus};

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// What every handler can see.
///
/// All scanning state lives in the coordinator task; handlers read its
/// latest snapshot and send it commands through the handle.
#[derive(Debug, Clone)]
pub struct AppState {
    coordinator: CoordinatorHandle,
    regions: RegionSet,
}

impl AppState {
    /// Create shared state around a running coordinator.
    #[must_use]
    pub fn shared(coordinator: CoordinatorHandle, regions: RegionSet) -> SharedState {
        Arc::new(Self {
            coordinator,
            regions,
        })
    }

    /// Handle to the coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> ScanStatus {
        self.coordinator.status()
    }

    /// The configured regions.
    #[must_use]
    pub const fn regions(&self) -> &RegionSet {
        &self.regions
    }
}
