//! BlueZ-backed collaborators.
//!
//! This module provides:
//! - [`BluezPermission`]: grants access when an adapter can be opened
//! - [`BluezRadio`]: adapter power reports from BlueZ property changes
//! - [`BluezRanging`]: iBeacon ranging over LE discovery
//!
//! Linux has no location permission for BLE scanning, so the permission
//! answer reduces to "is there a usable adapter".

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::beacon::Beacon;
use crate::config::ScannerConfig;
use crate::ibeacon::{IBeaconFrame, SightingTable, APPLE_COMPANY_ID};
use crate::readiness::RadioState;
use crate::region::RegionSet;
use crate::sources::{
    PermissionGrant, PermissionProvider, RadioStateSource, RadioStream, RangingBatch,
    RangingSource, RangingSubscription, SourceError, SourceResult,
};

/// An open BlueZ session and the adapter chosen for scanning.
#[derive(Clone)]
pub struct BluezAdapter {
    // Keeps the D-Bus connection alive for as long as the adapter is used.
    _session: Session,
    adapter: Adapter,
}

impl BluezAdapter {
    /// Connect to BlueZ and open the named adapter, or the default one.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::AdapterUnavailable`] if the daemon cannot be
    /// reached or the adapter does not exist.
    pub async fn open(name: Option<&str>) -> SourceResult<Self> {
        let session = Session::new().await.map_err(adapter_unavailable)?;
        let adapter = match name {
            Some(name) => session.adapter(name).map_err(adapter_unavailable)?,
            None => session.default_adapter().await.map_err(adapter_unavailable)?,
        };
        info!(adapter = %adapter.name(), "Opened Bluetooth adapter");
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// Adapter name, e.g. `hci0`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.adapter.name()
    }
}

impl std::fmt::Debug for BluezAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezAdapter")
            .field("name", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

fn adapter_unavailable(err: bluer::Error) -> SourceError {
    SourceError::AdapterUnavailable {
        message: err.to_string(),
    }
}

fn subscribe_failed(err: bluer::Error) -> SourceError {
    SourceError::Subscribe {
        message: err.to_string(),
    }
}

const fn radio_state(powered: bool) -> RadioState {
    if powered {
        RadioState::On
    } else {
        RadioState::Off
    }
}

// ============================================================================
// Permission
// ============================================================================

/// Permission provider that checks for a usable adapter.
#[derive(Debug, Clone, Default)]
pub struct BluezPermission {
    adapter: Option<String>,
}

impl BluezPermission {
    /// Probe the named adapter, or the default one.
    #[must_use]
    pub const fn new(adapter: Option<String>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl PermissionProvider for BluezPermission {
    async fn request_location_permission(&self) -> SourceResult<PermissionGrant> {
        match BluezAdapter::open(self.adapter.as_deref()).await {
            Ok(_) => Ok(PermissionGrant::Granted),
            Err(err) => {
                warn!(error = %err, "Bluetooth adapter unreachable; treating permission as denied");
                Ok(PermissionGrant::Denied)
            }
        }
    }
}

// ============================================================================
// Radio
// ============================================================================

/// Adapter power reports.
#[derive(Debug, Clone)]
pub struct BluezRadio {
    adapter: BluezAdapter,
}

impl BluezRadio {
    /// Report power changes of `adapter`.
    #[must_use]
    pub const fn new(adapter: BluezAdapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RadioStateSource for BluezRadio {
    async fn subscribe_state_changes(&self) -> SourceResult<RadioStream> {
        let adapter = &self.adapter.adapter;
        let events = adapter.events().await.map_err(subscribe_failed)?;
        let initial = radio_state(adapter.is_powered().await.map_err(subscribe_failed)?);
        debug!(state = ?initial, "Initial adapter power state");

        let changes = events.filter_map(|event| async move {
            match event {
                AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                    Some(radio_state(powered))
                }
                _ => None,
            }
        });
        Ok(futures::stream::once(async move { initial })
            .chain(changes)
            .boxed())
    }
}

// ============================================================================
// Ranging
// ============================================================================

/// iBeacon ranging over LE discovery.
///
/// Each subscription runs a worker task that records advertisements and,
/// every ranging interval, emits one batch per region.
#[derive(Debug, Clone)]
pub struct BluezRanging {
    adapter: BluezAdapter,
    interval: Duration,
    ttl: Duration,
}

impl BluezRanging {
    /// Range on `adapter` with the cadence from `scanner`.
    #[must_use]
    pub const fn new(adapter: BluezAdapter, scanner: &ScannerConfig) -> Self {
        Self {
            adapter,
            interval: scanner.ranging_interval(),
            ttl: scanner.beacon_ttl(),
        }
    }
}

#[async_trait]
impl RangingSource for BluezRanging {
    async fn subscribe(&self, regions: &RegionSet) -> SourceResult<RangingSubscription> {
        let adapter = self.adapter.adapter.clone();
        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..DiscoveryFilter::default()
        };
        adapter
            .set_discovery_filter(filter)
            .await
            .map_err(subscribe_failed)?;
        let events = adapter
            .discover_devices_with_changes()
            .await
            .map_err(subscribe_failed)?;

        let (sender, receiver) = mpsc::channel(regions.len().max(1) * 2);
        let worker = tokio::spawn(range(
            adapter,
            events,
            regions.clone(),
            self.interval,
            self.ttl,
            sender,
        ));

        let batches = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });
        Ok(RangingSubscription::with_worker(
            batches.boxed(),
            worker.abort_handle(),
        ))
    }
}

async fn range(
    adapter: Adapter,
    events: impl Stream<Item = AdapterEvent> + Send,
    regions: RegionSet,
    interval: Duration,
    ttl: Duration,
    sender: mpsc::Sender<SourceResult<RangingBatch>>,
) {
    futures::pin_mut!(events);
    let mut table = SightingTable::new(ttl);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(adapter = %adapter.name(), regions = regions.len(), "Discovery started");

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) => {
                    if let Some(beacon) = read_beacon(&adapter, address).await {
                        table.record(beacon, Instant::now());
                    }
                }
                Some(_) => {}
                None => {
                    let _ = sender
                        .send(Err(SourceError::Stream {
                            message: "discovery stream ended".to_string(),
                        }))
                        .await;
                    return;
                }
            },
            _ = ticker.tick() => {
                table.expire(Instant::now());
                for batch in table.batches(&regions) {
                    if sender.send(Ok(batch)).await.is_err() {
                        debug!("Ranging subscriber gone; stopping discovery");
                        return;
                    }
                }
            }
        }
    }
}

async fn read_beacon(adapter: &Adapter, address: Address) -> Option<Beacon> {
    let device = adapter.device(address).ok()?;
    let data = match device.manufacturer_data().await {
        Ok(data) => data?,
        Err(err) => {
            debug!(%address, error = %err, "Failed to read manufacturer data");
            return None;
        }
    };
    let frame = IBeaconFrame::parse(data.get(&APPLE_COMPANY_ID)?)?;
    let rssi = device.rssi().await.ok().flatten();
    Some(frame.to_beacon(rssi))
}
