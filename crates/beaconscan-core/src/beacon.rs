//! Beacons and the visible beacon set.
//!
//! The ranging source reports, per region, the complete set of beacons
//! currently in range. [`BeaconAggregator`] keeps the latest report for each
//! region and flattens them in configured region order, so the presentation
//! order is stable from one batch to the next.

use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::region::RegionSet;

/// A ranged proximity beacon.
///
/// Every measurement is optional because the ranging source may omit values
/// it could not determine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "proximity_key": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 100,
    "minor": 7,
    "rssi_dbm": -62,
    "accuracy_m": null
}))]
pub struct Beacon {
    /// Proximity UUID advertised by the beacon.
    #[schema(value_type = String, example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e")]
    pub proximity_key: Uuid,

    /// Major sub-identifier.
    #[schema(example = 100)]
    pub major: Option<u16>,

    /// Minor sub-identifier.
    #[schema(example = 7)]
    pub minor: Option<u16>,

    /// Received signal strength in dBm.
    #[serde(rename = "rssi_dbm")]
    #[schema(example = -62)]
    pub rssi: Option<i16>,

    /// Estimated distance in metres, when the source provides one.
    #[serde(rename = "accuracy_m")]
    pub accuracy: Option<f64>,
}

/// Identity of a beacon within a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeaconKey {
    /// Proximity UUID.
    pub proximity_key: Uuid,
    /// Major value.
    pub major: Option<u16>,
    /// Minor value.
    pub minor: Option<u16>,
}

impl Beacon {
    /// Create a beacon with only its proximity UUID known.
    #[must_use]
    pub const fn new(proximity_key: Uuid) -> Self {
        Self {
            proximity_key,
            major: None,
            minor: None,
            rssi: None,
            accuracy: None,
        }
    }

    /// Set the major value.
    #[must_use]
    pub fn with_major(mut self, major: u16) -> Self {
        self.major = Some(major);
        self
    }

    /// Set the minor value.
    #[must_use]
    pub fn with_minor(mut self, minor: u16) -> Self {
        self.minor = Some(minor);
        self
    }

    /// Set the received signal strength.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the estimated distance.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Identity of this beacon.
    #[must_use]
    pub const fn key(&self) -> BeaconKey {
        BeaconKey {
            proximity_key: self.proximity_key,
            major: self.major,
            minor: self.minor,
        }
    }
}

/// Ordered sequence of currently visible beacons.
pub type VisibleBeaconSet = Vec<Beacon>;

/// The latest beacons ranged for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RegionBeacons {
    /// Region identifier.
    #[schema(example = "lobby")]
    pub region: String,

    /// Beacons from the region's latest batch, in reported order.
    pub beacons: Vec<Beacon>,
}

/// Folds per-region ranging batches into one display-ordered set.
#[derive(Debug, Clone)]
pub struct BeaconAggregator {
    regions: RegionSet,
    latest: Vec<Vec<Beacon>>,
    visible: VisibleBeaconSet,
}

impl BeaconAggregator {
    /// Create an empty aggregator for `regions`.
    #[must_use]
    pub fn new(regions: RegionSet) -> Self {
        let latest = vec![Vec::new(); regions.len()];
        Self {
            regions,
            latest,
            visible: Vec::new(),
        }
    }

    /// Replace the beacons attributed to `region` and return the new set.
    ///
    /// Batches for regions outside the configured set are discarded.
    pub fn on_batch(&mut self, region: &str, beacons: Vec<Beacon>) -> &[Beacon] {
        let Some(index) = self.regions.position(region) else {
            warn!(region = %region, "Discarding ranging batch for unconfigured region");
            return &self.visible;
        };

        self.latest[index] = beacons;
        self.visible = self.latest.iter().flatten().cloned().collect();
        &self.visible
    }

    /// Forget every batch.
    pub fn on_clear(&mut self) {
        for batch in &mut self.latest {
            batch.clear();
        }
        self.visible.clear();
    }

    /// The current visible set.
    #[must_use]
    pub fn visible(&self) -> &[Beacon] {
        &self.visible
    }

    /// The latest batch of every region, in configured order.
    #[must_use]
    pub fn by_region(&self) -> Vec<RegionBeacons> {
        self.regions
            .iter()
            .zip(&self.latest)
            .map(|(region, beacons)| RegionBeacons {
                region: region.identifier.clone(),
                beacons: beacons.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    fn key(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn regions() -> RegionSet {
        RegionSet::new(vec![Region::new("a", key(1)), Region::new("b", key(2))]).unwrap()
    }

    #[test]
    fn test_batch_replaces_region_contents() {
        let mut agg = BeaconAggregator::new(regions());
        let x = Beacon::new(key(1)).with_major(1).with_minor(1);
        let y = Beacon::new(key(1)).with_major(1).with_minor(2);

        agg.on_batch("a", vec![x.clone().with_rssi(-70), y.clone().with_rssi(-80)]);
        let visible = agg.on_batch("a", vec![y.clone().with_rssi(-75)]);

        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].key(), y.key());
        assert_eq!(visible[0].rssi, Some(-75));
        assert!(!visible.iter().any(|b| b.key() == x.key()));
    }

    #[test]
    fn test_latest_rssi_wins() {
        let mut agg = BeaconAggregator::new(regions());
        let x = Beacon::new(key(1)).with_major(5).with_minor(5);

        agg.on_batch("a", vec![x.clone().with_rssi(-60)]);
        agg.on_batch("a", vec![x.with_rssi(-55)]);

        assert_eq!(agg.visible().len(), 1);
        assert_eq!(agg.visible()[0].rssi, Some(-55));
    }

    #[test]
    fn test_region_order_is_presentation_order() {
        let mut agg = BeaconAggregator::new(regions());
        agg.on_batch("b", vec![Beacon::new(key(2))]);
        agg.on_batch("a", vec![Beacon::new(key(1))]);

        let keys: Vec<_> = agg.visible().iter().map(|b| b.proximity_key).collect();
        assert_eq!(keys, vec![key(1), key(2)]);
    }

    #[test]
    fn test_other_regions_untouched_by_batch() {
        let mut agg = BeaconAggregator::new(regions());
        agg.on_batch("a", vec![Beacon::new(key(1))]);
        agg.on_batch("b", vec![Beacon::new(key(2))]);
        agg.on_batch("b", Vec::new());

        assert_eq!(agg.visible().len(), 1);
        assert_eq!(agg.visible()[0].proximity_key, key(1));
    }

    #[test]
    fn test_unknown_region_discarded() {
        let mut agg = BeaconAggregator::new(regions());
        agg.on_batch("a", vec![Beacon::new(key(1))]);
        let visible = agg.on_batch("nowhere", vec![Beacon::new(key(9))]);
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn test_by_region_keeps_reported_attribution() {
        let regions = RegionSet::new(vec![
            Region::new("narrow", key(1)).with_major(1),
            Region::new("wide", key(1)),
        ])
        .unwrap();
        let mut agg = BeaconAggregator::new(regions);
        agg.on_batch("wide", vec![Beacon::new(key(1)).with_major(1)]);

        let grouped = agg.by_region();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].region, "narrow");
        assert!(grouped[0].beacons.is_empty());
        assert_eq!(grouped[1].region, "wide");
        assert_eq!(grouped[1].beacons.len(), 1);
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut agg = BeaconAggregator::new(regions());
        agg.on_batch("a", vec![Beacon::new(key(1))]);
        agg.on_clear();
        assert!(agg.visible().is_empty());
        assert!(agg.by_region().iter().all(|r| r.beacons.is_empty()));

        agg.on_batch("b", vec![Beacon::new(key(2))]);
        assert_eq!(agg.visible().len(), 1);
    }
}
