//! Close-call matcher.
//!
//! Pairs human and vehicle detections into near-miss events with a
//! two-pointer sliding window over the time-sorted vehicle sequence:
//! for each human (in timestamp order) the candidate window `[lo, hi)`
//! only ever advances, so the join is near-linear in the number of
//! detections once both sides are sorted. A squared-distance prefilter
//! keeps the inner loop cheap; `hypot` only runs for admitted pairs.
//!
//! ## Deduplication
//!
//! A human and a vehicle lingering near each other produce many candidate
//! pairings that all describe one physical encounter. Candidates for a
//! `(human, vehicle)` tracking-id pair are clustered into encounters (a
//! gap wider than the time window starts a new encounter) and each
//! encounter emits exactly one event: the minimum-distance pairing,
//! earliest timestamp on ties.

use crate::config::SeverityBands;
use crate::error::Result;
use crate::guard::{ExecutionGuard, CHECK_INTERVAL};
use crate::query::ResolvedCloseCall;
use serde::{Deserialize, Serialize};
use sitesense_core::{time, CloseCallEvent, Detection, ObjectClass};
use std::collections::{BTreeMap, HashMap};

/// Processing statistics attached to close-call responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherStats {
    pub human_detections_processed: u64,
    pub vehicle_detections_processed: u64,
    pub close_calls_detected: u64,
    pub computation_time_ms: u64,
}

/// Severity breakdown with all three levels always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    #[serde(rename = "HIGH")]
    pub high: u64,
    #[serde(rename = "MEDIUM")]
    pub medium: u64,
    #[serde(rename = "LOW")]
    pub low: u64,
}

/// One point of a per-minute time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    human_idx: usize,
    vehicle_idx: usize,
    distance: f64,
    human_ts: i64,
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Match time-sorted human and vehicle detections into close-call events.
///
/// Both slices must be sorted by ascending timestamp; [`crate::facade`]
/// sorts what it fetches before calling in. Events come back time-ordered.
/// Empty input on either side yields an empty result.
pub fn match_close_calls(
    query: &ResolvedCloseCall,
    humans: &[Detection],
    vehicles: &[Detection],
    severity: &SeverityBands,
    guard: &ExecutionGuard,
) -> Result<Vec<CloseCallEvent>> {
    if humans.is_empty() || vehicles.is_empty() {
        return Ok(Vec::new());
    }

    let window = query.time_window_ms;
    let threshold_sq = query.distance_threshold * query.distance_threshold;

    // Phase 1: collect candidate pairings per (human, vehicle) track pair.
    // Humans are iterated in timestamp order, so each pair's candidate list
    // arrives ordered by human timestamp.
    let mut by_pair: HashMap<(&str, &str), Vec<Candidate>> = HashMap::new();
    let mut lo = 0usize;
    let mut hi = 0usize;

    for (human_idx, human) in humans.iter().enumerate() {
        if human_idx % CHECK_INTERVAL == 0 {
            guard.check()?;
        }

        while lo < vehicles.len() && vehicles[lo].timestamp < human.timestamp - window {
            lo += 1;
        }
        if hi < lo {
            hi = lo;
        }
        while hi < vehicles.len() && vehicles[hi].timestamp <= human.timestamp + window {
            hi += 1;
        }

        for (offset, vehicle) in vehicles[lo..hi].iter().enumerate() {
            if human.distance_sq_to(vehicle) <= threshold_sq {
                by_pair
                    .entry((human.tracking_id.as_str(), vehicle.tracking_id.as_str()))
                    .or_default()
                    .push(Candidate {
                        human_idx,
                        vehicle_idx: lo + offset,
                        distance: human.distance_to(vehicle),
                        human_ts: human.timestamp,
                    });
            }
        }
    }

    // Phase 2: collapse each pair's candidates into one event per
    // encounter, keeping the minimum-distance pairing.
    let mut events = Vec::new();
    for candidates in by_pair.values() {
        guard.check()?;

        let mut best: Option<Candidate> = None;
        let mut last_ts = i64::MIN;
        for candidate in candidates {
            if let Some(winner) = best {
                if candidate.human_ts - last_ts > window {
                    events.push(build_event(query, humans, vehicles, winner, severity));
                    best = Some(*candidate);
                } else if candidate.distance < winner.distance {
                    best = Some(*candidate);
                }
            } else {
                best = Some(*candidate);
            }
            last_ts = candidate.human_ts;
        }
        if let Some(winner) = best {
            events.push(build_event(query, humans, vehicles, winner, severity));
        }
    }

    events.sort_by(|a, b| {
        (a.timestamp, &a.human_tracking_id, &a.vehicle_tracking_id).cmp(&(
            b.timestamp,
            &b.human_tracking_id,
            &b.vehicle_tracking_id,
        ))
    });

    Ok(events)
}

fn build_event(
    query: &ResolvedCloseCall,
    humans: &[Detection],
    vehicles: &[Detection],
    candidate: Candidate,
    severity: &SeverityBands,
) -> CloseCallEvent {
    let human = &humans[candidate.human_idx];
    let vehicle = &vehicles[candidate.vehicle_idx];

    CloseCallEvent {
        timestamp: human.timestamp,
        human_tracking_id: human.tracking_id.clone(),
        human_x: human.x,
        human_y: human.y,
        human_zone: human.zone.clone(),
        vehicle_tracking_id: vehicle.tracking_id.clone(),
        vehicle_class: vehicle.object_class,
        vehicle_x: vehicle.x,
        vehicle_y: vehicle.y,
        vehicle_zone: vehicle.zone.clone(),
        distance: round_to(candidate.distance, 2),
        distance_threshold: query.distance_threshold,
        time_window_ms: query.time_window_ms,
        time_difference_ms: round_to((vehicle.timestamp - human.timestamp).abs() as f64, 1),
        severity: severity.classify(candidate.distance, query.distance_threshold),
    }
}

/// Derive the summary blocks of a close-call report.
pub fn summarize(
    events: &[CloseCallEvent],
) -> (
    BTreeMap<ObjectClass, u64>,
    SeverityBreakdown,
    Vec<TimeSeriesPoint>,
) {
    let mut by_vehicle_class: BTreeMap<ObjectClass, u64> = BTreeMap::new();
    let mut by_severity = SeverityBreakdown::default();
    let mut by_minute: BTreeMap<i64, u64> = BTreeMap::new();

    for event in events {
        *by_vehicle_class.entry(event.vehicle_class).or_default() += 1;
        match event.severity {
            sitesense_core::Severity::High => by_severity.high += 1,
            sitesense_core::Severity::Medium => by_severity.medium += 1,
            sitesense_core::Severity::Low => by_severity.low += 1,
        }
        let minute = event.timestamp.div_euclid(60_000) * 60_000;
        *by_minute.entry(minute).or_default() += 1;
    }

    let time_series = by_minute
        .into_iter()
        .map(|(minute, count)| TimeSeriesPoint {
            time: time::format_iso_minute(minute),
            count,
        })
        .collect();

    (by_vehicle_class, by_severity, time_series)
}
