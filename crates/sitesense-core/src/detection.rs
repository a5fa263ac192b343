//! Detection Row
//!
//! This module defines [`Detection`] - the fundamental input row of the
//! analytics engine.
//!
//! ## What is a Detection?
//!
//! One observation of a tracked object on the shop floor: a human, a manned
//! vehicle, a pallet truck or an AGV, located at `(x, y)` in local site
//! coordinates at a given instant. Rows come out of the detection store in
//! ascending timestamp order; the engine never mutates or persists them.
//!
//! ## Invariants
//!
//! - `timestamp` is milliseconds since the Unix epoch, UTC.
//! - `timestamp` is monotonic per `tracking_id` only within a single track
//!   segment; tracks may gap and restart.
//! - `vest` is only meaningful when `object_class` is [`ObjectClass::Human`].
//! - `speed` is non-negative meters/second when present.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Object classification of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Human,
    Vehicle,
    PalletTruck,
    Agv,
}

impl ObjectClass {
    /// All vehicle-like classes, in canonical order.
    pub const VEHICLES: [ObjectClass; 3] =
        [ObjectClass::Vehicle, ObjectClass::PalletTruck, ObjectClass::Agv];

    /// Whether this class counts as a vehicle for close-call pairing.
    pub fn is_vehicle(self) -> bool {
        matches!(
            self,
            ObjectClass::Vehicle | ObjectClass::PalletTruck | ObjectClass::Agv
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectClass::Human => "human",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::PalletTruck => "pallet_truck",
            ObjectClass::Agv => "agv",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(ObjectClass::Human),
            "vehicle" => Ok(ObjectClass::Vehicle),
            "pallet_truck" => Ok(ObjectClass::PalletTruck),
            "agv" => Ok(ObjectClass::Agv),
            other => Err(Error::UnknownObjectClass(other.to_string())),
        }
    }
}

/// A single detection row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detection timestamp in milliseconds since epoch (UTC).
    pub timestamp: i64,

    /// Identifies one physical object across frames. Not globally unique
    /// across classes.
    pub tracking_id: String,

    pub object_class: ObjectClass,

    /// Local X coordinate in meters.
    pub x: f64,

    /// Local Y coordinate in meters.
    pub y: f64,

    /// Spatial region label, when the site layout assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Instantaneous speed in m/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Safety vest status. Only meaningful for humans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vest: Option<bool>,

    /// Heading angle in degrees (0-360), when the tracker reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl Detection {
    /// Squared Euclidean distance to another detection's position.
    ///
    /// Cheaper than [`Detection::distance_to`] when only comparing against a
    /// squared threshold.
    pub fn distance_sq_to(&self, other: &Detection) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance to another detection's position, in meters.
    pub fn distance_to(&self, other: &Detection) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}
