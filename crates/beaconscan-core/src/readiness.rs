//! Readiness gating for the ranging session.
//!
//! Scanning needs two preconditions that are reported independently and
//! asynchronously: a location permission grant and a powered-on radio. The
//! radio state is only ever pushed to us, so no decision may be taken until
//! the first radio report has arrived. [`ReadinessGate`] holds that latch and
//! turns the current `(permission, radio)` pair into a [`Decision`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Location permission as seen by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// The permission request has not resolved yet.
    #[default]
    Unknown,
    /// Location access was granted.
    Granted,
    /// Location access was denied, restricted, or the request failed.
    Denied,
}

/// Bluetooth radio power state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    /// No report yet, or the radio is in a transitional state.
    #[default]
    Unknown,
    /// The radio is powered on.
    On,
    /// The radio is powered off or unavailable.
    Off,
}

/// What the session owner should do after a readiness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Preconditions hold: start the session unless it is already running.
    StartIfNotRunning,
    /// Preconditions do not hold: stop the session if it is running.
    StopIfRunning,
    /// No radio report has been observed yet; leave the session untouched.
    NoChange,
}

/// Returns `true` when both scanning preconditions hold.
#[inline]
#[must_use]
pub const fn can_scan(permission: PermissionState, radio: RadioState) -> bool {
    matches!(permission, PermissionState::Granted) && matches!(radio, RadioState::On)
}

/// Gate deciding whether scanning may run.
///
/// The gate carries a single-fire latch that is set by the first radio
/// report. Until then every evaluation yields [`Decision::NoChange`].
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    radio_confirmed: bool,
}

impl ReadinessGate {
    /// Create a gate that has not yet seen a radio report.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            radio_confirmed: false,
        }
    }

    /// Record that a radio report has been observed.
    ///
    /// Returns `true` only for the call that fires the latch.
    pub fn confirm_radio(&mut self) -> bool {
        let first = !self.radio_confirmed;
        self.radio_confirmed = true;
        first
    }

    /// Whether the first radio report has been observed.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.radio_confirmed
    }

    /// Evaluate the current preconditions.
    #[must_use]
    pub const fn observe(&self, permission: PermissionState, radio: RadioState) -> Decision {
        if !self.radio_confirmed {
            return Decision::NoChange;
        }
        if can_scan(permission, radio) {
            Decision::StartIfNotRunning
        } else {
            Decision::StopIfRunning
        }
    }
}
