//! Ranging regions.
//!
//! A [`Region`] is a filter describing which beacons to range for: every
//! beacon advertising the region's proximity UUID, optionally narrowed by
//! major and minor. The [`RegionSet`] is configured once and its order is the
//! presentation order of the visible beacon set.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::beacon::Beacon;
use crate::config::{ConfigError, ConfigResult};

/// A configured ranging filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "lobby",
    "proximity_key": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 100,
    "minor": null
}))]
pub struct Region {
    /// Unique name of the region.
    #[schema(example = "lobby")]
    pub identifier: String,

    /// Proximity UUID the beacons advertise.
    #[schema(value_type = String, example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e")]
    pub proximity_key: Uuid,

    /// Restrict to one major value.
    #[serde(default)]
    pub major: Option<u16>,

    /// Restrict to one minor value. Requires `major`.
    #[serde(default)]
    pub minor: Option<u16>,
}

impl Region {
    /// Create a region matching every beacon with the given proximity UUID.
    pub fn new(identifier: impl Into<String>, proximity_key: Uuid) -> Self {
        Self {
            identifier: identifier.into(),
            proximity_key,
            major: None,
            minor: None,
        }
    }

    /// Narrow the region to one major value.
    #[must_use]
    pub fn with_major(mut self, major: u16) -> Self {
        self.major = Some(major);
        self
    }

    /// Narrow the region to one minor value.
    #[must_use]
    pub fn with_minor(mut self, minor: u16) -> Self {
        self.minor = Some(minor);
        self
    }

    /// Whether `beacon` falls inside this region.
    #[must_use]
    pub fn matches(&self, beacon: &Beacon) -> bool {
        if beacon.proximity_key != self.proximity_key {
            return false;
        }
        if self.major.is_some() && beacon.major != self.major {
            return false;
        }
        if self.minor.is_some() && beacon.minor != self.minor {
            return false;
        }
        true
    }
}

/// Fixed, ordered list of regions to range for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionSet(Vec<Region>);

impl RegionSet {
    /// Build a validated region set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MultipleValidationErrors`] listing every invalid
    /// region, or a single [`ConfigError::ValidationError`] when only one
    /// problem was found.
    pub fn new(regions: Vec<Region>) -> ConfigResult<Self> {
        let mut errors = validate_regions(&regions);
        match errors.len() {
            0 => Ok(Self(regions)),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// An empty region set. Sessions refuse to start with it.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Number of regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no regions are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate regions in configured order.
    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.0.iter()
    }

    /// Regions as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Region] {
        &self.0
    }

    /// Configured position of the region named `identifier`.
    #[must_use]
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.0.iter().position(|r| r.identifier == identifier)
    }

    /// Position of the first region, in configured order, that `beacon`
    /// falls inside.
    #[must_use]
    pub fn position_for(&self, beacon: &Beacon) -> Option<usize> {
        self.0.iter().position(|r| r.matches(beacon))
    }
}

impl<'a> IntoIterator for &'a RegionSet {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Collect every validation problem in `regions`.
pub(crate) fn validate_regions(regions: &[Region]) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    for (index, region) in regions.iter().enumerate() {
        let field = format!("regions[{index}]");

        if region.identifier.trim().is_empty() {
            errors.push(ConfigError::ValidationError {
                field: format!("{field}.identifier"),
                message: "Region identifier cannot be empty".to_string(),
            });
        } else if regions[..index]
            .iter()
            .any(|earlier| earlier.identifier == region.identifier)
        {
            errors.push(ConfigError::ValidationError {
                field: format!("{field}.identifier"),
                message: format!("Duplicate region identifier '{}'", region.identifier),
            });
        }

        if region.proximity_key.is_nil() {
            errors.push(ConfigError::ValidationError {
                field: format!("{field}.proximity_key"),
                message: "Proximity UUID cannot be the nil UUID".to_string(),
            });
        }

        if region.minor.is_some() && region.major.is_none() {
            errors.push(ConfigError::ValidationError {
                field: format!("{field}.minor"),
                message: "A minor value requires a major value".to_string(),
            });
        }
    }

    errors
}
