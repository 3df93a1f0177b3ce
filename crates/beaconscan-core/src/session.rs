//! The ranging session.
//!
//! A [`ScanSession`] wraps at most one live [`RangingSubscription`].
//! Starting a running session or stopping a stopped one does nothing. The
//! session never restarts itself: when the subscription fails it reports a
//! [`SessionEvent::Terminated`] and goes back to idle, and it is up to the
//! owner to decide when to try again.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::BeaconError;
use crate::region::RegionSet;
use crate::sources::{RangingBatch, RangingSource, RangingSubscription, SourceError};

/// Reasons a session could not be started.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A subscription is already live.
    #[error("Ranging session is already running")]
    AlreadyRunning,

    /// There is nothing to range for.
    #[error("Cannot start ranging without any regions")]
    NoRegions,

    /// The ranging source refused the subscription.
    #[error("Ranging subscription failed: {0}")]
    Subscription(#[from] SourceError),
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Last thing that went wrong with the session, kept for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFault {
    /// The ranging source rejected a start attempt.
    SubscriptionFailure {
        /// What the source reported.
        message: String,
    },
    /// A running subscription ended or failed.
    StreamTerminated {
        /// What the source reported.
        message: String,
    },
}

/// Something that happened on the live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A ranging batch arrived.
    Batch(RangingBatch),
    /// The subscription ended; the session is no longer running.
    Terminated(SessionFault),
}

/// Owner of the single ranging subscription.
pub struct ScanSession {
    source: Arc<dyn RangingSource>,
    subscription: Option<RangingSubscription>,
}

impl ScanSession {
    /// Create an idle session over `source`.
    pub fn new(source: Arc<dyn RangingSource>) -> Self {
        Self {
            source,
            subscription: None,
        }
    }

    /// Whether a subscription is live.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// Open a ranging subscription for `regions`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyRunning`] if a subscription is live; nothing
    ///   is changed.
    /// - [`SessionError::NoRegions`] if `regions` is empty.
    /// - [`SessionError::Subscription`] if the source refused; the session
    ///   stays idle.
    pub async fn start(&mut self, regions: &RegionSet) -> SessionResult<()> {
        if self.is_running() {
            debug!("Ignoring start: ranging session already running");
            return Err(SessionError::AlreadyRunning);
        }
        if regions.is_empty() {
            return Err(SessionError::NoRegions);
        }

        let subscription = self.source.subscribe(regions).await?;
        self.subscription = Some(subscription);
        info!(regions = regions.len(), "Ranging session started");
        Ok(())
    }

    /// Cancel the live subscription, if any.
    ///
    /// Returns `true` if a subscription was cancelled.
    pub fn stop(&mut self) -> bool {
        match self.subscription.take() {
            Some(subscription) => {
                subscription.cancel();
                info!("Ranging session stopped");
                true
            }
            None => {
                debug!("Ignoring stop: ranging session not running");
                false
            }
        }
    }

    /// Wait for the next event on the live subscription.
    ///
    /// Never resolves while the session is idle. A failed or ended stream
    /// drops the subscription before the [`SessionEvent::Terminated`] is
    /// returned.
    pub async fn next_event(&mut self) -> SessionEvent {
        let Some(subscription) = self.subscription.as_mut() else {
            return futures::future::pending().await;
        };

        let (code, message) = match subscription.next().await {
            Some(Ok(batch)) => return SessionEvent::Batch(batch),
            Some(Err(err)) => {
                let err = BeaconError::from(err);
                (err.error_code(), err.to_string())
            }
            None => ("STREAM_ENDED", "ranging stream ended".to_string()),
        };

        self.subscription = None;
        warn!(code, reason = %message, "Ranging session terminated unexpectedly");
        SessionEvent::Terminated(SessionFault::StreamTerminated { message })
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
