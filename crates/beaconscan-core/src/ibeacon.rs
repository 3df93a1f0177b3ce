//! iBeacon advertisement decoding and sighting bookkeeping.
//!
//! An iBeacon is a BLE advertisement carrying Apple manufacturer data:
//!
//! ```text
//! 0x02 0x15 | proximity UUID (16) | major (2, BE) | minor (2, BE) | tx power (1)
//! ```
//!
//! [`SightingTable`] remembers the last advertisement seen from each beacon
//! and turns them into per-region batches, forgetting beacons that have
//! gone quiet for longer than the configured TTL.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::beacon::{Beacon, BeaconKey};
use crate::region::RegionSet;
use crate::sources::RangingBatch;

/// Bluetooth SIG company identifier for Apple.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;
const FRAME_LEN: usize = 23;

/// A decoded iBeacon advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeaconFrame {
    /// Proximity UUID.
    pub proximity_key: Uuid,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
    /// Calibrated RSSI at one metre, in dBm.
    pub measured_power: i8,
}

impl IBeaconFrame {
    /// Decode Apple manufacturer data.
    ///
    /// Returns `None` for anything that is not an iBeacon frame.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_LEN || data[0] != IBEACON_TYPE || data[1] != IBEACON_LENGTH {
            return None;
        }

        let uuid: [u8; 16] = data[2..18].try_into().ok()?;
        Some(Self {
            proximity_key: Uuid::from_bytes(uuid),
            major: u16::from_be_bytes([data[18], data[19]]),
            minor: u16::from_be_bytes([data[20], data[21]]),
            measured_power: i8::from_be_bytes([data[22]]),
        })
    }

    /// The frame as a beacon reading with the given signal strength.
    #[must_use]
    pub fn to_beacon(&self, rssi: Option<i16>) -> Beacon {
        let beacon = Beacon::new(self.proximity_key)
            .with_major(self.major)
            .with_minor(self.minor);
        match rssi {
            Some(rssi) => beacon.with_rssi(rssi),
            None => beacon,
        }
    }
}

/// Last-seen advertisements, keyed by beacon identity.
#[derive(Debug)]
pub struct SightingTable {
    ttl: Duration,
    seen: BTreeMap<BeaconKey, (Beacon, Instant)>,
}

impl SightingTable {
    /// Create an empty table that forgets beacons after `ttl`.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: BTreeMap::new(),
        }
    }

    /// Record a sighting at `now`, replacing any earlier one.
    pub fn record(&mut self, beacon: Beacon, now: Instant) {
        self.seen.insert(beacon.key(), (beacon, now));
    }

    /// Drop sightings older than the TTL.
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, (_, seen_at)| now.saturating_duration_since(*seen_at) <= ttl);
    }

    /// Number of beacons currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// One batch per region, in configured order.
    ///
    /// Each beacon lands in the first region it matches. Regions with no
    /// beacons still get an (empty) batch so stale readings are cleared.
    #[must_use]
    pub fn batches(&self, regions: &RegionSet) -> Vec<RangingBatch> {
        let mut grouped: Vec<Vec<Beacon>> = vec![Vec::new(); regions.len()];
        for (beacon, _) in self.seen.values() {
            if let Some(index) = regions.position_for(beacon) {
                grouped[index].push(beacon.clone());
            }
        }

        regions
            .iter()
            .zip(grouped)
            .map(|(region, beacons)| RangingBatch::new(region.identifier.clone(), beacons))
            .collect()
    }
}
