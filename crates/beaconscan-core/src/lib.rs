//! # beaconscan-core
//!
//! Core coordination logic for beaconscan, a permission and radio gated
//! iBeacon ranging service.
//!
//! This crate provides:
//! - A scan coordinator that starts ranging only once location permission
//!   is granted and the Bluetooth radio is confirmed on
//! - Aggregation of per-region ranging batches into one visible beacon set
//! - iBeacon advertisement decoding and BlueZ-backed collaborators
//! - Configuration management (server, scanner, permission, regions)
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`coordinator`] - The single-owner task driving the scan lifecycle
//! - [`readiness`] - Permission/radio state and the start/stop decision
//! - [`session`] - The single live ranging subscription
//! - [`beacon`] - Beacons and the visible beacon set
//! - [`region`] - Ranging regions
//! - [`sources`] - Collaborator traits (permission, radio, ranging)
//! - [`ibeacon`] - iBeacon frame decoding and sighting expiry
//! - `bluetooth` - BlueZ collaborators (feature `bluetooth`)
//! - `mock` - Channel-driven collaborators (feature `mock-bluetooth`)
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod beacon;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ibeacon;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod readiness;
pub mod region;
pub mod session;
pub mod sources;

// Re-export primary types for convenience
pub use beacon::{Beacon, BeaconAggregator, BeaconKey, RegionBeacons, VisibleBeaconSet};
#[cfg(feature = "bluetooth")]
pub use bluetooth::{BluezAdapter, BluezPermission, BluezRadio, BluezRanging};
pub use config::{
    Config, ConfigError, ConfigResult, PermissionConfig, PermissionMode, ScannerConfig,
    ServerConfig,
};
pub use coordinator::{Collaborators, Coordinator, CoordinatorHandle, Phase, ScanStatus};
pub use error::{BeaconError, Error, Result};
pub use ibeacon::{IBeaconFrame, SightingTable, APPLE_COMPANY_ID};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::{
    MockPermission, MockPermissionHandle, MockRadio, MockRadioHandle, MockRanging,
    MockRangingHandle,
};
pub use readiness::{can_scan, Decision, PermissionState, RadioState, ReadinessGate};
pub use region::{Region, RegionSet};
pub use session::{ScanSession, SessionError, SessionEvent, SessionFault, SessionResult};
pub use sources::{
    PermissionGrant, PermissionProvider, RadioStateSource, RadioStream, RangingBatch,
    RangingSource, RangingSubscription, SourceError, SourceResult, StaticPermission,
};
