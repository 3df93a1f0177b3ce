//! External collaborators consumed by the coordinator.
//!
//! The coordinator never talks to a platform API directly. It asks a
//! [`PermissionProvider`] once for location access, listens to a
//! [`RadioStateSource`] for power changes, and opens ranging subscriptions
//! on a [`RangingSource`]. Implementations live in [`crate::bluetooth`]
//! (BlueZ) and [`crate::mock`] (channel-driven, for tests).

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beacon::Beacon;
use crate::readiness::{PermissionState, RadioState};
use crate::region::RegionSet;

/// Failures reported by a collaborator.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// No Bluetooth adapter could be opened.
    #[error("No Bluetooth adapter available: {message}")]
    AdapterUnavailable {
        /// Underlying failure.
        message: String,
    },

    /// The permission request itself failed.
    #[error("Permission request failed: {message}")]
    PermissionRequest {
        /// Underlying failure.
        message: String,
    },

    /// Subscribing to a stream was rejected.
    #[error("Subscription rejected: {message}")]
    Subscribe {
        /// Underlying failure.
        message: String,
    },

    /// An established stream failed.
    #[error("Stream failed: {message}")]
    Stream {
        /// Underlying failure.
        message: String,
    },
}

/// Result type for collaborator calls.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Outcome of a location permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionGrant {
    /// Access granted.
    Granted,
    /// Access refused by the user.
    Denied,
    /// Access blocked by policy.
    Restricted,
}

impl From<PermissionGrant> for PermissionState {
    fn from(grant: PermissionGrant) -> Self {
        match grant {
            PermissionGrant::Granted => Self::Granted,
            PermissionGrant::Denied | PermissionGrant::Restricted => Self::Denied,
        }
    }
}

/// One ranging report: the complete set of beacons currently in range for a
/// region.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingBatch {
    /// Identifier of the region the batch belongs to.
    pub region: String,
    /// Beacons currently in range.
    pub beacons: Vec<Beacon>,
}

impl RangingBatch {
    /// Create a batch.
    pub fn new(region: impl Into<String>, beacons: Vec<Beacon>) -> Self {
        Self {
            region: region.into(),
            beacons,
        }
    }
}

/// Stream of radio power reports.
pub type RadioStream = BoxStream<'static, RadioState>;

/// A live ranging subscription.
///
/// Dropping the subscription cancels it: no further batches are delivered
/// and any worker the source spawned is aborted.
pub struct RangingSubscription {
    batches: BoxStream<'static, SourceResult<RangingBatch>>,
    worker: Option<tokio::task::AbortHandle>,
}

impl RangingSubscription {
    /// Wrap a batch stream.
    #[must_use]
    pub fn new(batches: BoxStream<'static, SourceResult<RangingBatch>>) -> Self {
        Self {
            batches,
            worker: None,
        }
    }

    /// Wrap a batch stream fed by a spawned worker task.
    #[must_use]
    pub fn with_worker(
        batches: BoxStream<'static, SourceResult<RangingBatch>>,
        worker: tokio::task::AbortHandle,
    ) -> Self {
        Self {
            batches,
            worker: Some(worker),
        }
    }

    /// Cancel the subscription.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Stream for RangingSubscription {
    type Item = SourceResult<RangingBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.batches.as_mut().poll_next(cx)
    }
}

impl Drop for RangingSubscription {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl fmt::Debug for RangingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangingSubscription")
            .field("has_worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

/// Asks for location access. Called once at startup.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Request location permission and wait for the answer.
    async fn request_location_permission(&self) -> SourceResult<PermissionGrant>;
}

/// Push-only source of radio power reports.
#[async_trait]
pub trait RadioStateSource: Send + Sync {
    /// Subscribe to power state changes.
    async fn subscribe_state_changes(&self) -> SourceResult<RadioStream>;
}

/// Push source of per-region ranging batches.
#[async_trait]
pub trait RangingSource: Send + Sync {
    /// Start ranging for `regions`.
    async fn subscribe(&self, regions: &RegionSet) -> SourceResult<RangingSubscription>;
}

/// Permission provider answering with a fixed grant.
///
/// Used on hosts where location access is governed by configuration rather
/// than by an interactive prompt.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub PermissionGrant);

#[async_trait]
impl PermissionProvider for StaticPermission {
    async fn request_location_permission(&self) -> SourceResult<PermissionGrant> {
        Ok(self.0)
    }
}
