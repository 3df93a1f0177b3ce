//! Scan coordinator.
//!
//! The coordinator is a single `tokio` task that owns every piece of mutable
//! scanning state. It consumes four event sources one at a time:
//!
//! - the one-shot permission request,
//! - the radio state stream,
//! - the live ranging subscription (through [`ScanSession`]),
//! - commands sent through a [`CoordinatorHandle`].
//!
//! Each event is handled to completion, including any session start or
//! stop, before the next one is selected. While a collaborator call is in
//! flight (the permission request, the radio subscription or a ranging
//! subscription) commands are still answered and shutdown still wins.
//! After every event the new [`ScanStatus`] is published on a `watch`
//! channel for the presentation layer.
//!
//! ```text
//! Initializing ──permission──▶ AwaitingFirstRadioState ──first radio report──▶ Ready
//!       │                              │                                         │
//!       └──────────────────────────────┴────────────── shutdown ─────────────────┴──▶ ShutDown
//! ```

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::beacon::{BeaconAggregator, RegionBeacons, VisibleBeaconSet};
use crate::error::{BeaconError, Result};
use crate::readiness::{can_scan, Decision, PermissionState, RadioState, ReadinessGate};
use crate::region::RegionSet;
use crate::session::{ScanSession, SessionEvent, SessionFault};
use crate::sources::{PermissionProvider, RadioStateSource, RadioStream, RangingSource};

const COMMAND_BUFFER: usize = 32;

/// Lifecycle phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the permission request to resolve.
    Initializing,
    /// Subscribed to the radio, waiting for its first report.
    AwaitingFirstRadioState,
    /// Reacting to every precondition change.
    Ready,
    /// Torn down; no further events are processed.
    ShutDown,
}

/// Snapshot of everything the presentation layer may observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScanStatus {
    /// Coordinator lifecycle phase.
    pub phase: Phase,

    /// Location permission.
    pub permission: PermissionState,

    /// Radio power state.
    pub radio: RadioState,

    /// Whether a ranging session is live.
    pub scanning: bool,

    /// Beacons currently in range, in region order.
    pub beacons: VisibleBeaconSet,

    /// The same beacons grouped by the region whose batch reported them.
    pub by_region: Vec<RegionBeacons>,

    /// Last session failure, cleared by the next successful start.
    pub fault: Option<SessionFault>,

    /// When this snapshot was taken.
    pub updated_at_utc: DateTime<Utc>,
}

impl ScanStatus {
    fn initial() -> Self {
        Self {
            phase: Phase::Initializing,
            permission: PermissionState::Unknown,
            radio: RadioState::Unknown,
            scanning: false,
            beacons: Vec::new(),
            by_region: Vec::new(),
            fault: None,
            updated_at_utc: Utc::now(),
        }
    }

    /// Whether both scanning preconditions currently hold.
    #[must_use]
    pub const fn can_scan(&self) -> bool {
        can_scan(self.permission, self.radio)
    }
}

/// The collaborators a coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Location permission.
    pub permission: Arc<dyn PermissionProvider>,
    /// Radio power reports.
    pub radio: Arc<dyn RadioStateSource>,
    /// Beacon ranging.
    pub ranging: Arc<dyn RangingSource>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

enum Command {
    Start(oneshot::Sender<ScanStatus>),
    Stop(oneshot::Sender<ScanStatus>),
}

/// Cloneable access to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ScanStatus>,
}

impl CoordinatorHandle {
    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> ScanStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.status.clone()
    }

    /// Ask for scanning to start. Does nothing unless scanning is currently
    /// allowed.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::CoordinatorShutDown`] once the coordinator has
    /// been torn down.
    pub async fn request_start(&self) -> Result<ScanStatus> {
        self.send(Command::Start).await
    }

    /// Ask for scanning to stop.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::CoordinatorShutDown`] once the coordinator has
    /// been torn down.
    pub async fn request_stop(&self) -> Result<ScanStatus> {
        self.send(Command::Stop).await
    }

    async fn send(&self, command: fn(oneshot::Sender<ScanStatus>) -> Command) -> Result<ScanStatus> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| BeaconError::CoordinatorShutDown)?;
        response.await.map_err(|_| BeaconError::CoordinatorShutDown)
    }
}

/// Owner of the coordinator task.
///
/// Dropping the owner without calling [`Coordinator::shutdown`] still shuts
/// the task down, but does not wait for it. Outstanding handles do not keep
/// the task alive.
#[derive(Debug)]
pub struct Coordinator {
    handle: CoordinatorHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Spawn the coordinator on the current `tokio` runtime.
    #[must_use]
    pub fn spawn(regions: RegionSet, collaborators: Collaborators) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ScanStatus::initial());
        let cancel = CancellationToken::new();

        let task = CoordinatorTask {
            commands: command_rx,
            cancel: cancel.clone(),
            aggregator: BeaconAggregator::new(regions.clone()),
            session: ScanSession::new(collaborators.ranging),
            permission_provider: collaborators.permission,
            radio_source: collaborators.radio,
            regions,
            phase: Phase::Initializing,
            permission: PermissionState::Unknown,
            radio: RadioState::Unknown,
            gate: ReadinessGate::new(),
            fault: None,
            status: status_tx,
        };

        Self {
            handle: CoordinatorHandle {
                commands,
                status: status_rx,
            },
            cancel,
            task: Some(tokio::spawn(task.run())),
        }
    }

    /// A handle for the presentation layer.
    #[must_use]
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Tear the coordinator down and return its final status.
    ///
    /// Cancels the radio subscription and any live ranging subscription.
    pub async fn shutdown(mut self) -> ScanStatus {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Coordinator task did not finish cleanly");
            }
        }
        self.handle.status()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!("Coordinator owner dropped; cancelling task");
            self.cancel.cancel();
        }
    }
}

struct CoordinatorTask {
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    regions: RegionSet,
    permission_provider: Arc<dyn PermissionProvider>,
    radio_source: Arc<dyn RadioStateSource>,
    session: ScanSession,
    aggregator: BeaconAggregator,
    gate: ReadinessGate,
    phase: Phase,
    permission: PermissionState,
    radio: RadioState,
    fault: Option<SessionFault>,
    status: watch::Sender<ScanStatus>,
}

impl CoordinatorTask {
    async fn run(mut self) {
        info!(regions = self.regions.len(), "Coordinator initializing");

        let Some(permission) = self.await_permission().await else {
            self.shut_down(None);
            return;
        };
        self.permission = permission;
        self.phase = Phase::AwaitingFirstRadioState;
        self.publish();

        let Some(mut radio) = self.subscribe_radio().await else {
            self.shut_down(None);
            return;
        };

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(Command::Start(reply)) => {
                        self.on_start_requested().await;
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Stop(reply)) => {
                        self.on_stop_requested();
                        let _ = reply.send(self.snapshot());
                    }
                    None => break,
                },

                report = next_radio_report(&mut radio) => match report {
                    Some(state) => self.on_radio_state(state).await,
                    None => {
                        radio = None;
                        self.on_radio_lost();
                    }
                },

                event = self.session.next_event(), if self.session.is_running() => {
                    self.on_session_event(event);
                }
            }
        }

        self.shut_down(radio);
    }

    /// Returns `None` if shutdown was requested before the answer arrived.
    async fn await_permission(&mut self) -> Option<PermissionState> {
        let pending = self.snapshot();
        let provider = Arc::clone(&self.permission_provider);
        let served = serve_while(
            provider.request_location_permission(),
            &mut self.commands,
            &self.cancel,
            &pending,
        )
        .await?;

        let permission = match served.output {
            Ok(grant) => {
                info!(?grant, "Location permission resolved");
                PermissionState::from(grant)
            }
            Err(err) => {
                let err = BeaconError::from(err);
                warn!(
                    code = err.error_code(),
                    error = %err,
                    "Location permission request failed; treating as denied"
                );
                PermissionState::Denied
            }
        };
        Some(permission)
    }

    /// Returns `None` if shutdown was requested first. A refused
    /// subscription yields `Some(None)`: the coordinator keeps waiting.
    async fn subscribe_radio(&mut self) -> Option<Option<RadioStream>> {
        let pending = self.snapshot();
        let source = Arc::clone(&self.radio_source);
        let served = serve_while(
            source.subscribe_state_changes(),
            &mut self.commands,
            &self.cancel,
            &pending,
        )
        .await?;

        match served.output {
            Ok(stream) => Some(Some(stream)),
            Err(err) => {
                let err = BeaconError::from(err);
                warn!(
                    code = err.error_code(),
                    error = %err,
                    "Radio state unavailable; scanning stays disabled"
                );
                Some(None)
            }
        }
    }

    async fn on_radio_state(&mut self, state: RadioState) {
        self.radio = state;
        if self.gate.confirm_radio() {
            self.phase = Phase::Ready;
            info!(radio = ?state, "First radio state received; coordinator ready");
        } else {
            debug!(radio = ?state, "Radio state changed");
        }
        self.evaluate().await;
        self.publish();
    }

    fn on_radio_lost(&mut self) {
        warn!("Radio state stream ended; treating radio as off");
        self.radio = RadioState::Off;
        if self.gate.is_confirmed() && self.session.is_running() {
            self.stop_session();
        }
        self.publish();
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Batch(batch) => {
                let visible = self.aggregator.on_batch(&batch.region, batch.beacons);
                debug!(region = %batch.region, visible = visible.len(), "Ranging batch applied");
            }
            SessionEvent::Terminated(fault) => {
                self.aggregator.on_clear();
                self.radio = RadioState::Off;
                self.fault = Some(fault);
            }
        }
        self.publish();
    }

    async fn on_start_requested(&mut self) {
        match self.gate.observe(self.permission, self.radio) {
            Decision::StartIfNotRunning => self.apply(Decision::StartIfNotRunning).await,
            Decision::StopIfRunning | Decision::NoChange => {
                debug!("Start requested while scanning is not allowed; ignoring");
            }
        }
        self.publish();
    }

    fn on_stop_requested(&mut self) {
        if self.session.is_running() {
            self.stop_session();
        }
        self.publish();
    }

    async fn evaluate(&mut self) {
        let decision = self.gate.observe(self.permission, self.radio);
        self.apply(decision).await;
    }

    async fn apply(&mut self, decision: Decision) {
        match decision {
            Decision::StartIfNotRunning if !self.session.is_running() => self.start_session().await,
            Decision::StopIfRunning if self.session.is_running() => self.stop_session(),
            Decision::NoChange => debug!("No radio report yet; no scan decision"),
            Decision::StartIfNotRunning | Decision::StopIfRunning => {}
        }
    }

    async fn start_session(&mut self) {
        let pending = self.snapshot();
        let start = self.session.start(&self.regions);
        let Some(served) = serve_while(start, &mut self.commands, &self.cancel, &pending).await
        else {
            debug!("Ranging start abandoned for shutdown");
            return;
        };

        match served.output.map_err(BeaconError::from) {
            Ok(()) => {
                self.fault = None;
                if served.stop_requested {
                    debug!("Stop arrived while ranging was starting");
                    self.stop_session();
                }
            }
            Err(err) if err.is_expected_state() => {}
            Err(err) => {
                warn!(
                    code = err.error_code(),
                    recoverable = err.is_recoverable(),
                    error = %err,
                    "Could not start ranging session"
                );
                self.fault = Some(SessionFault::SubscriptionFailure {
                    message: err.to_string(),
                });
            }
        }
    }

    fn stop_session(&mut self) {
        self.session.stop();
        self.aggregator.on_clear();
    }

    fn shut_down(&mut self, radio: Option<RadioStream>) {
        drop(radio);
        self.session.stop();
        self.aggregator.on_clear();
        self.phase = Phase::ShutDown;
        self.publish();
        info!("Coordinator shut down");
    }

    fn snapshot(&self) -> ScanStatus {
        ScanStatus {
            phase: self.phase,
            permission: self.permission,
            radio: self.radio,
            scanning: self.session.is_running(),
            beacons: self.aggregator.visible().to_vec(),
            by_region: self.aggregator.by_region(),
            fault: self.fault.clone(),
            updated_at_utc: Utc::now(),
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

/// Output of a collaborator call that finished while commands were served.
struct Served<T> {
    output: T,
    stop_requested: bool,
}

/// Drive `work` to completion while answering commands with `pending`.
///
/// Returns `None` once shutdown is requested or every handle is gone; `work`
/// is dropped unfinished in that case.
async fn serve_while<F: Future>(
    work: F,
    commands: &mut mpsc::Receiver<Command>,
    cancel: &CancellationToken,
    pending: &ScanStatus,
) -> Option<Served<F::Output>> {
    tokio::pin!(work);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return None,

            command = commands.recv() => match command {
                Some(Command::Start(reply)) => {
                    debug!("Start requested while a collaborator call is pending");
                    let _ = reply.send(pending.clone());
                }
                Some(Command::Stop(reply)) => {
                    stop_requested = true;
                    let _ = reply.send(pending.clone());
                }
                None => return None,
            },

            output = &mut work => {
                return Some(Served {
                    output,
                    stop_requested,
                });
            }
        }
    }
}

async fn next_radio_report(radio: &mut Option<RadioStream>) -> Option<RadioState> {
    match radio {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::Beacon;
    use crate::mock::{
        MockPermission, MockPermissionHandle, MockRadio, MockRadioHandle, MockRanging,
        MockRangingHandle,
    };
    use crate::region::Region;
    use crate::sources::{PermissionGrant, RangingBatch, RangingSubscription, SourceResult};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        coordinator: Coordinator,
        status: watch::Receiver<ScanStatus>,
        permission: Option<MockPermissionHandle>,
        radio: MockRadioHandle,
        ranging: MockRangingHandle,
    }

    fn key() -> Uuid {
        Uuid::from_u128(0xf782_6da6)
    }

    fn regions() -> RegionSet {
        RegionSet::new(vec![
            Region::new("region-a", key()).with_major(1),
            Region::new("region-b", key()).with_major(2),
        ])
        .unwrap()
    }

    /// Radio source whose subscription never completes.
    struct StalledRadio;

    #[async_trait]
    impl RadioStateSource for StalledRadio {
        async fn subscribe_state_changes(&self) -> SourceResult<RadioStream> {
            futures::future::pending().await
        }
    }

    /// Ranging source that holds every subscribe call until `gate` opens.
    struct GatedRanging {
        gate: Arc<Notify>,
        inner: MockRanging,
    }

    #[async_trait]
    impl RangingSource for GatedRanging {
        async fn subscribe(&self, regions: &RegionSet) -> SourceResult<RangingSubscription> {
            self.gate.notified().await;
            self.inner.subscribe(regions).await
        }
    }

    fn gated_harness() -> (Harness, Arc<Notify>) {
        let (inner, ranging_handle) = MockRanging::new();
        let gate = Arc::new(Notify::new());
        let ranging = GatedRanging {
            gate: Arc::clone(&gate),
            inner,
        };
        (harness_with(Arc::new(ranging), ranging_handle), gate)
    }

    /// Repeats `command` until it is answered from inside a pending ranging
    /// start. Phase `Ready` without a live session is only observable there
    /// while the gate is closed.
    async fn until_start_pending(
        handle: &CoordinatorHandle,
        command: fn(oneshot::Sender<ScanStatus>) -> Command,
    ) -> ScanStatus {
        for _ in 0..200 {
            let status = tokio::time::timeout(WAIT, handle.send(command))
                .await
                .expect("command was not answered")
                .unwrap();
            if status.phase == Phase::Ready && !status.scanning {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("ranging start never became pending");
    }

    fn harness() -> Harness {
        let (ranging, ranging_handle) = MockRanging::new();
        harness_with(Arc::new(ranging), ranging_handle)
    }

    fn harness_with(ranging: Arc<dyn RangingSource>, ranging_handle: MockRangingHandle) -> Harness {
        let (permission, permission_handle) = MockPermission::new();
        let (radio, radio_handle) = MockRadio::new();

        let coordinator = Coordinator::spawn(
            regions(),
            Collaborators {
                permission: Arc::new(permission),
                radio: Arc::new(radio),
                ranging,
            },
        );

        Harness {
            status: coordinator.handle().subscribe(),
            coordinator,
            permission: Some(permission_handle),
            radio: radio_handle,
            ranging: ranging_handle,
        }
    }

    impl Harness {
        fn grant(&mut self, grant: PermissionGrant) {
            self.permission.take().unwrap().resolve(grant);
        }

        async fn wait_for(&mut self, predicate: impl FnMut(&ScanStatus) -> bool) -> ScanStatus {
            tokio::time::timeout(WAIT, self.status.wait_for(predicate))
                .await
                .expect("timed out waiting for status")
                .expect("status channel closed")
                .clone()
        }

        async fn running(&mut self) -> ScanStatus {
            self.grant(PermissionGrant::Granted);
            self.radio.set(RadioState::On);
            self.wait_for(|s| s.scanning).await
        }
    }

    fn beacon_x(rssi: i16) -> Beacon {
        Beacon::new(key()).with_major(1).with_minor(42).with_rssi(rssi)
    }

    #[tokio::test]
    async fn test_no_decision_before_first_radio_report() {
        let mut h = harness();
        h.grant(PermissionGrant::Granted);

        let status = h.wait_for(|s| s.phase == Phase::AwaitingFirstRadioState).await;
        assert_eq!(status.permission, PermissionState::Granted);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.coordinator.handle().status().scanning);
        assert_eq!(h.ranging.subscribe_count(), 0);

        let status = h.coordinator.handle().request_start().await.unwrap();
        assert!(!status.scanning);
        assert_eq!(h.ranging.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_permission_never_scans() {
        let mut h = harness();
        h.grant(PermissionGrant::Denied);
        h.radio.set(RadioState::On);

        let status = h
            .wait_for(|s| s.phase == Phase::Ready && s.radio == RadioState::On)
            .await;
        assert_eq!(status.permission, PermissionState::Denied);
        assert!(!status.scanning);
        assert!(status.beacons.is_empty());
        assert_eq!(h.ranging.subscribe_count(), 0);

        let status = h.coordinator.handle().request_start().await.unwrap();
        assert!(!status.scanning);
        assert_eq!(h.ranging.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_restricted_permission_is_denied() {
        let mut h = harness();
        h.grant(PermissionGrant::Restricted);
        h.radio.set(RadioState::On);

        let status = h.wait_for(|s| s.phase == Phase::Ready).await;
        assert_eq!(status.permission, PermissionState::Denied);
        assert!(!status.scanning);
    }

    #[tokio::test]
    async fn test_radio_off_then_on_starts_session() {
        let mut h = harness();
        h.grant(PermissionGrant::Granted);
        h.radio.set(RadioState::Off);

        let status = h
            .wait_for(|s| s.phase == Phase::Ready && s.radio == RadioState::Off)
            .await;
        assert!(!status.scanning);
        assert_eq!(h.ranging.subscribe_count(), 0);

        h.radio.set(RadioState::On);
        let status = h.wait_for(|s| s.scanning).await;
        assert_eq!(status.radio, RadioState::On);
        assert_eq!(h.ranging.subscribe_count(), 1);
        assert_eq!(h.ranging.last_regions(), Some(regions()));
    }

    #[tokio::test]
    async fn test_radio_off_stops_session_and_clears_beacons() {
        let mut h = harness();
        h.running().await;

        h.ranging.send_batch(RangingBatch::new("region-a", vec![beacon_x(-60)]));
        h.wait_for(|s| s.beacons.len() == 1).await;

        h.radio.set(RadioState::Off);
        let status = h.wait_for(|s| !s.scanning).await;
        assert!(status.beacons.is_empty());
        assert_eq!(status.radio, RadioState::Off);
        assert_eq!(h.ranging.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_latest_batch_replaces_previous() {
        let mut h = harness();
        h.running().await;

        h.ranging.send_batch(RangingBatch::new("region-a", vec![beacon_x(-60)]));
        h.ranging.send_batch(RangingBatch::new("region-a", vec![beacon_x(-55)]));

        let status = h
            .wait_for(|s| s.beacons.first().and_then(|b| b.rssi) == Some(-55))
            .await;
        assert_eq!(status.beacons.len(), 1);
        assert_eq!(status.beacons[0].key(), beacon_x(0).key());
    }

    #[tokio::test]
    async fn test_repeated_on_reports_keep_single_subscription() {
        let mut h = harness();
        h.running().await;

        h.radio.set(RadioState::On);
        h.radio.set(RadioState::On);
        h.coordinator.handle().request_start().await.unwrap();

        assert_eq!(h.ranging.subscribe_count(), 1);
        assert_eq!(h.ranging.live_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_permission_failure_treated_as_denied() {
        let mut h = harness();
        h.permission.take().unwrap().fail("provider crashed");
        h.radio.set(RadioState::On);

        let status = h.wait_for(|s| s.phase == Phase::Ready).await;
        assert_eq!(status.permission, PermissionState::Denied);
        assert!(!status.scanning);
    }

    #[tokio::test]
    async fn test_stream_termination_waits_for_radio_transition() {
        let mut h = harness();
        h.running().await;
        h.ranging.send_batch(RangingBatch::new("region-b", vec![Beacon::new(key())]));
        h.wait_for(|s| !s.beacons.is_empty()).await;

        h.ranging.fail_stream("radio dropped");
        let status = h.wait_for(|s| !s.scanning).await;
        assert!(status.beacons.is_empty());
        assert_eq!(status.radio, RadioState::Off);
        assert!(matches!(
            status.fault,
            Some(SessionFault::StreamTerminated { .. })
        ));

        let status = h.coordinator.handle().request_start().await.unwrap();
        assert!(!status.scanning);
        assert_eq!(h.ranging.subscribe_count(), 1);

        h.radio.set(RadioState::On);
        let status = h.wait_for(|s| s.scanning).await;
        assert!(status.fault.is_none());
        assert_eq!(h.ranging.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_subscription_failure_retried_on_next_change() {
        let mut h = harness();
        h.ranging.fail_next_subscribe("adapter busy");
        h.grant(PermissionGrant::Granted);
        h.radio.set(RadioState::On);

        let status = h.wait_for(|s| s.fault.is_some()).await;
        assert!(!status.scanning);
        assert!(matches!(
            status.fault,
            Some(SessionFault::SubscriptionFailure { .. })
        ));

        h.radio.set(RadioState::Off);
        h.radio.set(RadioState::On);
        let status = h.wait_for(|s| s.scanning).await;
        assert!(status.fault.is_none());
        assert_eq!(h.ranging.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_manual_stop_and_start() {
        let mut h = harness();
        h.running().await;
        let handle = h.coordinator.handle();

        let status = handle.request_stop().await.unwrap();
        assert!(!status.scanning);
        let status = handle.request_stop().await.unwrap();
        assert!(!status.scanning);
        assert_eq!(h.ranging.live_subscriptions(), 0);

        let status = handle.request_start().await.unwrap();
        assert!(status.scanning);
        assert_eq!(h.ranging.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_radio_keeps_waiting() {
        let (permission, permission_handle) = MockPermission::new();
        let (ranging, ranging_handle) = MockRanging::new();
        let coordinator = Coordinator::spawn(
            regions(),
            Collaborators {
                permission: Arc::new(permission),
                radio: Arc::new(MockRadio::unavailable()),
                ranging: Arc::new(ranging),
            },
        );
        permission_handle.resolve(PermissionGrant::Granted);

        let mut status = coordinator.handle().subscribe();
        tokio::time::timeout(
            WAIT,
            status.wait_for(|s| s.phase == Phase::AwaitingFirstRadioState),
        )
        .await
        .unwrap()
        .unwrap();

        let after = coordinator.handle().request_start().await.unwrap();
        assert!(!after.scanning);
        assert_eq!(ranging_handle.subscribe_count(), 0);

        let last = coordinator.shutdown().await;
        assert_eq!(last.phase, Phase::ShutDown);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_subscriptions() {
        let mut h = harness();
        h.running().await;
        h.ranging.send_batch(RangingBatch::new("region-a", vec![beacon_x(-70)]));
        h.wait_for(|s| !s.beacons.is_empty()).await;

        let handle = h.coordinator.handle();
        let last = h.coordinator.shutdown().await;

        assert_eq!(last.phase, Phase::ShutDown);
        assert!(!last.scanning);
        assert!(last.beacons.is_empty());
        assert_eq!(h.ranging.live_subscriptions(), 0);
        assert!(!h.radio.is_subscribed());
        assert!(!h.ranging.send_batch(RangingBatch::new("region-a", vec![beacon_x(-50)])));

        let err = handle.request_start().await.unwrap_err();
        assert!(matches!(err, BeaconError::CoordinatorShutDown));
    }

    #[tokio::test]
    async fn test_shutdown_while_permission_pending() {
        let h = harness();
        let last = h.coordinator.shutdown().await;
        assert_eq!(last.phase, Phase::ShutDown);
        assert_eq!(last.permission, PermissionState::Unknown);
        assert_eq!(h.ranging.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_radio_stream_end_stops_session() {
        let mut h = harness();
        h.running().await;

        h.radio.close();
        let status = h.wait_for(|s| !s.scanning).await;
        assert_eq!(status.radio, RadioState::Off);
        assert_eq!(h.ranging.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_commands_and_shutdown_while_radio_subscribe_stalls() {
        let (permission, permission_handle) = MockPermission::new();
        let (ranging, ranging_handle) = MockRanging::new();
        let coordinator = Coordinator::spawn(
            regions(),
            Collaborators {
                permission: Arc::new(permission),
                radio: Arc::new(StalledRadio),
                ranging: Arc::new(ranging),
            },
        );
        permission_handle.resolve(PermissionGrant::Granted);

        let mut status = coordinator.handle().subscribe();
        tokio::time::timeout(
            WAIT,
            status.wait_for(|s| s.phase == Phase::AwaitingFirstRadioState),
        )
        .await
        .unwrap()
        .unwrap();

        let handle = coordinator.handle();
        let stopped = tokio::time::timeout(WAIT, handle.request_stop())
            .await
            .expect("stop was not answered")
            .unwrap();
        assert!(!stopped.scanning);
        let started = tokio::time::timeout(WAIT, handle.request_start())
            .await
            .expect("start was not answered")
            .unwrap();
        assert!(!started.scanning);

        let last = tokio::time::timeout(WAIT, coordinator.shutdown())
            .await
            .expect("shutdown did not finish");
        assert_eq!(last.phase, Phase::ShutDown);
        assert_eq!(ranging_handle.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_while_ranging_subscribe_stalls() {
        let (mut h, _gate) = gated_harness();
        h.grant(PermissionGrant::Granted);
        h.radio.set(RadioState::On);

        until_start_pending(&h.coordinator.handle(), Command::Start).await;

        let last = tokio::time::timeout(WAIT, h.coordinator.shutdown())
            .await
            .expect("shutdown did not finish");
        assert_eq!(last.phase, Phase::ShutDown);
        assert!(!last.scanning);
        assert_eq!(h.ranging.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_stop_while_ranging_starts_wins() {
        let (mut h, gate) = gated_harness();
        h.grant(PermissionGrant::Granted);
        h.radio.set(RadioState::On);

        until_start_pending(&h.coordinator.handle(), Command::Stop).await;

        gate.notify_one();
        let status = h.wait_for(|s| s.phase == Phase::Ready).await;
        assert!(!status.scanning);
        assert_eq!(h.ranging.subscribe_count(), 1);
        assert_eq!(h.ranging.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_dropping_owner_stops_task_despite_live_handles() {
        let mut h = harness();
        h.running().await;
        let handle = h.coordinator.handle();
        let mut status = handle.subscribe();

        drop(h.coordinator);

        tokio::time::timeout(WAIT, status.wait_for(|s| s.phase == Phase::ShutDown))
            .await
            .expect("task kept running")
            .unwrap();
        assert_eq!(h.ranging.live_subscriptions(), 0);
        assert!(matches!(
            handle.request_start().await,
            Err(BeaconError::CoordinatorShutDown)
        ));
    }

    #[tokio::test]
    async fn test_status_groups_beacons_by_reporting_region() {
        let mut h = harness();
        h.running().await;
        h.ranging.send_batch(RangingBatch::new("region-b", vec![beacon_x(-65)]));

        let status = h.wait_for(|s| !s.beacons.is_empty()).await;
        assert_eq!(status.by_region.len(), 2);
        assert!(status.by_region[0].beacons.is_empty());
        assert_eq!(status.by_region[1].region, "region-b");
        assert_eq!(status.by_region[1].beacons, vec![beacon_x(-65)]);
    }
}
