//! Close-call events.
//!
//! A [`CloseCallEvent`] pairs one human detection with one vehicle detection
//! that came within `distance_threshold` meters of each other inside the
//! query's time window. Events are derived on demand and never persisted.
//!
//! The flattened field set here is load-bearing: dashboard consumers read
//! these exact keys, so renaming or dropping a field is a breaking change.

use crate::detection::ObjectClass;
use crate::error::Error;
use crate::time;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Risk classification of a close call, derived from distance relative to
/// the query's distance threshold. Ordering is by increasing risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            other => Err(Error::UnknownSeverity(other.to_string())),
        }
    }
}

/// One human/vehicle near-miss event.
///
/// Invariants, relative to the query that produced it:
/// `distance <= distance_threshold` and
/// `time_difference_ms <= time_window_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseCallEvent {
    /// Timestamp of the human detection, ISO 8601 UTC on the wire.
    #[serde(with = "time::iso_millis")]
    pub timestamp: i64,

    pub human_tracking_id: String,
    pub human_x: f64,
    pub human_y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_zone: Option<String>,

    pub vehicle_tracking_id: String,
    pub vehicle_class: ObjectClass,
    pub vehicle_x: f64,
    pub vehicle_y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_zone: Option<String>,

    /// Euclidean distance between the paired positions, meters, rounded to
    /// two decimals.
    pub distance: f64,

    /// The threshold the query ran with. Severity is relative to this value,
    /// not to a hidden constant.
    pub distance_threshold: f64,

    pub time_window_ms: i64,

    /// Absolute time delta between the paired detections, milliseconds,
    /// rounded to one decimal.
    pub time_difference_ms: f64,

    pub severity: Severity,
}

impl CloseCallEvent {
    /// Zone attributed to the event: the vehicle's zone, falling back to the
    /// human's.
    pub fn zone(&self) -> Option<&str> {
        self.vehicle_zone.as_deref().or(self.human_zone.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_wire_format() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"HIGH\"");
        assert_eq!("MEDIUM".parse::<Severity>().unwrap(), Severity::Medium);
        assert!("medium".parse::<Severity>().is_err());
    }

    #[test]
    fn test_event_serializes_iso_timestamp() {
        let event = CloseCallEvent {
            timestamp: 100,
            human_tracking_id: "h1".to_string(),
            human_x: 0.0,
            human_y: 0.0,
            human_zone: Some("dock".to_string()),
            vehicle_tracking_id: "v1".to_string(),
            vehicle_class: ObjectClass::Agv,
            vehicle_x: 1.0,
            vehicle_y: 0.0,
            vehicle_zone: None,
            distance: 1.0,
            distance_threshold: 2.0,
            time_window_ms: 250,
            time_difference_ms: 20.0,
            severity: Severity::High,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00.100Z");
        assert_eq!(json["vehicle_class"], "agv");
        assert_eq!(json["severity"], "HIGH");
        // vehicle_zone is None and must be absent, not null
        assert!(json.get("vehicle_zone").is_none());

        let back: CloseCallEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_zone_fallback() {
        let mut event = CloseCallEvent {
            timestamp: 0,
            human_tracking_id: "h1".to_string(),
            human_x: 0.0,
            human_y: 0.0,
            human_zone: Some("aisle-3".to_string()),
            vehicle_tracking_id: "v1".to_string(),
            vehicle_class: ObjectClass::Vehicle,
            vehicle_x: 0.0,
            vehicle_y: 0.0,
            vehicle_zone: None,
            distance: 0.5,
            distance_threshold: 2.0,
            time_window_ms: 250,
            time_difference_ms: 0.0,
            severity: Severity::High,
        };
        assert_eq!(event.zone(), Some("aisle-3"));
        event.vehicle_zone = Some("dock".to_string());
        assert_eq!(event.zone(), Some("dock"));
    }
}
