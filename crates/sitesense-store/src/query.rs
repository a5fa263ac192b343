//! Store query predicates.

use serde::{Deserialize, Serialize};
use sitesense_core::{Detection, ObjectClass};

/// Coarse predicate set a detection store is expected to index: time range,
/// class set and zone set. Finer predicates (vest, speed, spatial bounds)
/// are applied engine-side.
///
/// All fields are optional; empty collections impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    /// Inclusive lower timestamp bound, milliseconds since epoch.
    pub from_time: Option<i64>,

    /// Inclusive upper timestamp bound, milliseconds since epoch.
    pub to_time: Option<i64>,

    /// Object classes to include. Empty means all classes.
    pub object_classes: Vec<ObjectClass>,

    /// Zones to include. Empty means all zones, including unzoned rows.
    pub zones: Vec<String>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_range(mut self, from_time: Option<i64>, to_time: Option<i64>) -> Self {
        self.from_time = from_time;
        self.to_time = to_time;
        self
    }

    pub fn with_classes(mut self, classes: impl IntoIterator<Item = ObjectClass>) -> Self {
        self.object_classes = classes.into_iter().collect();
        self
    }

    pub fn with_zones(mut self, zones: impl IntoIterator<Item = String>) -> Self {
        self.zones = zones.into_iter().collect();
        self
    }

    /// Whether a detection satisfies every present predicate.
    pub fn matches(&self, detection: &Detection) -> bool {
        if let Some(from) = self.from_time {
            if detection.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if detection.timestamp > to {
                return false;
            }
        }
        if !self.object_classes.is_empty()
            && !self.object_classes.contains(&detection.object_class)
        {
            return false;
        }
        if !self.zones.is_empty() {
            match &detection.zone {
                Some(zone) => {
                    if !self.zones.iter().any(|z| z == zone) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}
