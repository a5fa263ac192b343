//! Safety violation scans: vest violations and overspeed events.
//!
//! Simpler single-stream siblings of the close-call matcher: no pairing,
//! just predicate scans over the filtered detection set with the usual
//! breakdowns (by zone, by class, per-minute series). They run behind the
//! same facade and cache as everything else.

use crate::closecall::TimeSeriesPoint;
use crate::config::OverspeedConfig;
use crate::error::Result;
use crate::guard::{ExecutionGuard, CHECK_INTERVAL};
use serde::{Deserialize, Serialize};
use sitesense_core::{time, Detection, ObjectClass};
use std::collections::{BTreeMap, HashSet};

/// Count of violations attributed to one zone. `zone: None` collects
/// unzoned detections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCount {
    pub zone: Option<String>,
    pub count: u64,
}

/// Count of violations attributed to one object class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCount {
    pub object_class: ObjectClass,
    pub count: u64,
}

/// Summary of humans detected without a safety vest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VestViolationSummary {
    pub total_count: u64,
    pub unique_humans: u64,
    pub by_zone: Vec<ZoneCount>,
    pub time_series: Vec<TimeSeriesPoint>,
}

/// Summary of detections exceeding their speed threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverspeedSummary {
    pub total_count: u64,
    pub unique_offenders: u64,

    /// The single override threshold the scan ran with, if any; absent
    /// means per-class configured thresholds applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_threshold: Option<f64>,

    pub by_object_class: Vec<ClassCount>,
    pub by_zone: Vec<ZoneCount>,
    pub max_speed: f64,
    pub avg_speed: f64,
    pub time_series: Vec<TimeSeriesPoint>,
}

fn zone_counts(map: BTreeMap<Option<String>, u64>) -> Vec<ZoneCount> {
    map.into_iter()
        .map(|(zone, count)| ZoneCount { zone, count })
        .collect()
}

fn minute_series(map: BTreeMap<i64, u64>) -> Vec<TimeSeriesPoint> {
    map.into_iter()
        .map(|(minute, count)| TimeSeriesPoint {
            time: time::format_iso_minute(minute),
            count,
        })
        .collect()
}

/// Scan pre-filtered human detections for `vest == false` rows.
///
/// Rows with unknown vest status are not violations.
pub fn scan_vest_violations(
    humans: &[Detection],
    guard: &ExecutionGuard,
) -> Result<VestViolationSummary> {
    let mut total = 0u64;
    let mut offenders: HashSet<&str> = HashSet::new();
    let mut by_zone: BTreeMap<Option<String>, u64> = BTreeMap::new();
    let mut by_minute: BTreeMap<i64, u64> = BTreeMap::new();

    for (i, detection) in humans.iter().enumerate() {
        if i % CHECK_INTERVAL == 0 {
            guard.check()?;
        }
        if detection.object_class != ObjectClass::Human || detection.vest != Some(false) {
            continue;
        }
        total += 1;
        offenders.insert(&detection.tracking_id);
        *by_zone.entry(detection.zone.clone()).or_default() += 1;
        let minute = detection.timestamp.div_euclid(60_000) * 60_000;
        *by_minute.entry(minute).or_default() += 1;
    }

    Ok(VestViolationSummary {
        total_count: total,
        unique_humans: offenders.len() as u64,
        by_zone: zone_counts(by_zone),
        time_series: minute_series(by_minute),
    })
}

/// Scan pre-filtered detections for rows exceeding their speed threshold.
///
/// With `threshold_override` set, one threshold applies to every class;
/// otherwise each class compares against its configured limit. Rows
/// without speed data never qualify.
pub fn scan_overspeed(
    detections: &[Detection],
    threshold_override: Option<f64>,
    config: &OverspeedConfig,
    guard: &ExecutionGuard,
) -> Result<OverspeedSummary> {
    let mut total = 0u64;
    let mut offenders: HashSet<&str> = HashSet::new();
    let mut by_class: BTreeMap<ObjectClass, u64> = BTreeMap::new();
    let mut by_zone: BTreeMap<Option<String>, u64> = BTreeMap::new();
    let mut by_minute: BTreeMap<i64, u64> = BTreeMap::new();
    let mut max_speed = 0f64;
    let mut speed_sum = 0f64;

    for (i, detection) in detections.iter().enumerate() {
        if i % CHECK_INTERVAL == 0 {
            guard.check()?;
        }
        let Some(speed) = detection.speed else {
            continue;
        };
        let threshold =
            threshold_override.unwrap_or_else(|| config.threshold_for(detection.object_class));
        if speed <= threshold {
            continue;
        }

        total += 1;
        offenders.insert(&detection.tracking_id);
        *by_class.entry(detection.object_class).or_default() += 1;
        *by_zone.entry(detection.zone.clone()).or_default() += 1;
        let minute = detection.timestamp.div_euclid(60_000) * 60_000;
        *by_minute.entry(minute).or_default() += 1;
        max_speed = max_speed.max(speed);
        speed_sum += speed;
    }

    Ok(OverspeedSummary {
        total_count: total,
        unique_offenders: offenders.len() as u64,
        speed_threshold: threshold_override,
        by_object_class: by_class
            .into_iter()
            .map(|(object_class, count)| ClassCount {
                object_class,
                count,
            })
            .collect(),
        by_zone: zone_counts(by_zone),
        max_speed,
        avg_speed: if total > 0 {
            speed_sum / total as f64
        } else {
            0.0
        },
        time_series: minute_series(by_minute),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn guard() -> ExecutionGuard {
        ExecutionGuard::new(Duration::from_secs(30), CancellationToken::new())
    }

    fn det(
        ts: i64,
        id: &str,
        class: ObjectClass,
        zone: Option<&str>,
        speed: Option<f64>,
        vest: Option<bool>,
    ) -> Detection {
        Detection {
            timestamp: ts,
            tracking_id: id.to_string(),
            object_class: class,
            x: 0.0,
            y: 0.0,
            zone: zone.map(str::to_string),
            speed,
            vest,
            heading: None,
        }
    }

    #[test]
    fn test_vest_violations_only_count_explicit_false() {
        let rows = vec![
            det(0, "h1", ObjectClass::Human, Some("dock"), None, Some(false)),
            det(1, "h1", ObjectClass::Human, Some("dock"), None, Some(false)),
            det(2, "h2", ObjectClass::Human, None, None, Some(true)),
            det(3, "h3", ObjectClass::Human, None, None, None),
        ];
        let summary = scan_vest_violations(&rows, &guard()).unwrap();
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.unique_humans, 1);
        assert_eq!(summary.by_zone.len(), 1);
        assert_eq!(summary.by_zone[0].zone.as_deref(), Some("dock"));
        assert_eq!(summary.by_zone[0].count, 2);
    }

    #[test]
    fn test_overspeed_per_class_thresholds() {
        let config = OverspeedConfig::default();
        let rows = vec![
            // Human walking above the 2.0 human limit.
            det(0, "h1", ObjectClass::Human, None, Some(2.5), None),
            // Vehicle below its 5.0 limit.
            det(1, "v1", ObjectClass::Vehicle, None, Some(4.5), None),
            // AGV above its 4.0 limit.
            det(2, "a1", ObjectClass::Agv, None, Some(4.5), None),
            // No speed data never qualifies.
            det(3, "v2", ObjectClass::Vehicle, None, None, None),
        ];
        let summary = scan_overspeed(&rows, None, &config, &guard()).unwrap();
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.unique_offenders, 2);
        assert_eq!(summary.speed_threshold, None);
        assert_eq!(summary.max_speed, 4.5);
        assert!((summary.avg_speed - 3.5).abs() < 1e-9);
        let classes: Vec<ObjectClass> = summary
            .by_object_class
            .iter()
            .map(|c| c.object_class)
            .collect();
        assert_eq!(classes, vec![ObjectClass::Human, ObjectClass::Agv]);
    }

    #[test]
    fn test_overspeed_override_threshold() {
        let config = OverspeedConfig::default();
        let rows = vec![
            det(0, "v1", ObjectClass::Vehicle, None, Some(2.0), None),
            det(1, "v2", ObjectClass::Vehicle, None, Some(1.0), None),
        ];
        let summary = scan_overspeed(&rows, Some(1.5), &config, &guard()).unwrap();
        assert_eq!(summary.total_count, 1);
        assert_eq!(summary.speed_threshold, Some(1.5));
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        // "Overspeed" means strictly above the limit.
        let config = OverspeedConfig::default();
        let rows = vec![det(0, "v1", ObjectClass::Vehicle, None, Some(5.0), None)];
        let summary = scan_overspeed(&rows, None, &config, &guard()).unwrap();
        assert_eq!(summary.total_count, 0);
    }

    #[test]
    fn test_empty_scans() {
        let summary = scan_vest_violations(&[], &guard()).unwrap();
        assert_eq!(summary, VestViolationSummary::default());

        let config = OverspeedConfig::default();
        let summary = scan_overspeed(&[], None, &config, &guard()).unwrap();
        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.avg_speed, 0.0);
    }
}
