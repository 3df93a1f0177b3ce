//! Channel-driven collaborators for tests and hardware-free runs.
//!
//! Each mock is created together with a handle. The mock is given to the
//! coordinator; the handle stays with the test (or the demo driver) and is
//! used to push permission answers, radio reports and ranging batches, and
//! to inspect how many ranging subscriptions are live.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::readiness::RadioState;
use crate::region::RegionSet;
use crate::sources::{
    PermissionGrant, PermissionProvider, RadioStateSource, RadioStream, RangingBatch,
    RangingSource, RangingSubscription, SourceError, SourceResult,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Permission
// ============================================================================

/// Permission provider answered through a [`MockPermissionHandle`].
#[derive(Debug)]
pub struct MockPermission {
    answer: Mutex<Option<oneshot::Receiver<SourceResult<PermissionGrant>>>>,
}

/// Resolves the pending permission request.
#[derive(Debug)]
pub struct MockPermissionHandle {
    sender: oneshot::Sender<SourceResult<PermissionGrant>>,
}

impl MockPermission {
    /// Create a provider whose request stays pending until the handle answers.
    #[must_use]
    pub fn new() -> (Self, MockPermissionHandle) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                answer: Mutex::new(Some(receiver)),
            },
            MockPermissionHandle { sender },
        )
    }
}

impl MockPermissionHandle {
    /// Answer the request with `grant`.
    pub fn resolve(self, grant: PermissionGrant) {
        let _ = self.sender.send(Ok(grant));
    }

    /// Make the request fail.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.sender.send(Err(SourceError::PermissionRequest {
            message: message.into(),
        }));
    }
}

#[async_trait]
impl PermissionProvider for MockPermission {
    async fn request_location_permission(&self) -> SourceResult<PermissionGrant> {
        let receiver = lock(&self.answer).take();
        let Some(receiver) = receiver else {
            return Err(SourceError::PermissionRequest {
                message: "permission already requested".to_string(),
            });
        };
        receiver.await.unwrap_or_else(|_| {
            Err(SourceError::PermissionRequest {
                message: "permission request abandoned".to_string(),
            })
        })
    }
}

// ============================================================================
// Radio
// ============================================================================

/// Radio source fed through a [`MockRadioHandle`].
#[derive(Debug)]
pub struct MockRadio {
    reports: Mutex<Option<mpsc::UnboundedReceiver<RadioState>>>,
}

/// Pushes radio reports into a [`MockRadio`].
#[derive(Debug, Clone)]
pub struct MockRadioHandle {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<RadioState>>>>,
}

impl MockRadio {
    /// Create a radio source and its handle.
    ///
    /// Reports pushed before anyone subscribes are buffered.
    #[must_use]
    pub fn new() -> (Self, MockRadioHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                reports: Mutex::new(Some(receiver)),
            },
            MockRadioHandle {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
        )
    }

    /// Create a radio source that refuses subscriptions.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            reports: Mutex::new(None),
        }
    }
}

impl MockRadioHandle {
    /// Push a report. Returns `false` once the subscriber has gone away.
    pub fn set(&self, state: RadioState) -> bool {
        lock(&self.sender)
            .as_ref()
            .is_some_and(|sender| sender.send(state).is_ok())
    }

    /// End the report stream.
    pub fn close(&self) {
        lock(&self.sender).take();
    }

    /// Whether the subscriber still holds the stream.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        lock(&self.sender)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }
}

#[async_trait]
impl RadioStateSource for MockRadio {
    async fn subscribe_state_changes(&self) -> SourceResult<RadioStream> {
        let receiver = lock(&self.reports).take().ok_or_else(|| SourceError::Subscribe {
            message: "radio state stream unavailable".to_string(),
        })?;

        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|state| (state, receiver))
        })
        .boxed())
    }
}

// ============================================================================
// Ranging
// ============================================================================

#[derive(Debug, Default)]
struct RangingState {
    subscribe_count: usize,
    fail_next: Option<String>,
    sender: Option<mpsc::UnboundedSender<SourceResult<RangingBatch>>>,
    last_regions: Option<RegionSet>,
}

/// Ranging source driven through a [`MockRangingHandle`].
#[derive(Debug)]
pub struct MockRanging {
    state: Arc<Mutex<RangingState>>,
    live: Arc<AtomicUsize>,
}

/// Feeds and inspects a [`MockRanging`].
#[derive(Debug, Clone)]
pub struct MockRangingHandle {
    state: Arc<Mutex<RangingState>>,
    live: Arc<AtomicUsize>,
}

/// Counts a subscription as live until its stream is dropped or ends.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRanging {
    /// Create a ranging source and its handle.
    #[must_use]
    pub fn new() -> (Self, MockRangingHandle) {
        let state = Arc::new(Mutex::new(RangingState::default()));
        let live = Arc::new(AtomicUsize::new(0));
        (
            Self {
                state: Arc::clone(&state),
                live: Arc::clone(&live),
            },
            MockRangingHandle { state, live },
        )
    }
}

impl MockRangingHandle {
    /// Number of subscriptions ever opened.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        lock(&self.state).subscribe_count
    }

    /// Number of subscriptions currently live.
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Regions passed to the most recent subscription.
    #[must_use]
    pub fn last_regions(&self) -> Option<RegionSet> {
        lock(&self.state).last_regions.clone()
    }

    /// Make the next subscribe call fail with `message`.
    pub fn fail_next_subscribe(&self, message: impl Into<String>) {
        lock(&self.state).fail_next = Some(message.into());
    }

    /// Deliver a batch to the latest subscription.
    ///
    /// Returns `false` if there is no live subscriber to receive it.
    pub fn send_batch(&self, batch: RangingBatch) -> bool {
        self.send(Ok(batch))
    }

    /// Fail the latest subscription's stream.
    pub fn fail_stream(&self, message: impl Into<String>) -> bool {
        self.send(Err(SourceError::Stream {
            message: message.into(),
        }))
    }

    /// End the latest subscription's stream without an error.
    pub fn end_stream(&self) {
        lock(&self.state).sender.take();
    }

    fn send(&self, item: SourceResult<RangingBatch>) -> bool {
        lock(&self.state)
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(item).is_ok())
    }
}

#[async_trait]
impl RangingSource for MockRanging {
    async fn subscribe(&self, regions: &RegionSet) -> SourceResult<RangingSubscription> {
        let mut state = lock(&self.state);
        state.subscribe_count += 1;
        state.last_regions = Some(regions.clone());

        if let Some(message) = state.fail_next.take() {
            return Err(SourceError::Subscribe { message });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.sender = Some(sender);
        let guard = LiveGuard::new(Arc::clone(&self.live));

        let batches = futures::stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
            receiver.recv().await.map(|item| (item, (receiver, guard)))
        });
        Ok(RangingSubscription::new(batches.boxed()))
    }
}
