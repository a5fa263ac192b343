//! Query model: metrics, dimensions, filters, requests and their resolved
//! forms.
//!
//! Boundary requests (`AggregationRequest`, `CloseCallRequest`) are
//! loosely-optional: most fields can be absent. Resolution applies every
//! default and validates once, producing a fully-determined `Resolved*`
//! value that the canonicalizer hashes and the engine executes. Nothing
//! downstream of resolution ever re-checks parameters.
//!
//! Dimensions and metrics are closed enums with explicit dispatch; an
//! unknown name fails at parse/validation time instead of silently
//! no-op grouping.

use crate::aggregate::AggregateRecord;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use sitesense_core::{ObjectClass, TimeBucket};
use sitesense_store::StoreQuery;
use std::fmt;
use std::str::FromStr;

const MS_PER_DAY: i64 = 24 * 3600 * 1000;

/// Metric computed per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Count,
    UniqueIds,
    AvgSpeed,
    Rate,
    VestCompliance,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Count => "count",
            Metric::UniqueIds => "unique_ids",
            Metric::AvgSpeed => "avg_speed",
            Metric::Rate => "rate",
            Metric::VestCompliance => "vest_compliance",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(Metric::Count),
            "unique_ids" => Ok(Metric::UniqueIds),
            "avg_speed" => Ok(Metric::AvgSpeed),
            "rate" => Ok(Metric::Rate),
            "vest_compliance" => Ok(Metric::VestCompliance),
            other => Err(EngineError::InvalidQuery(format!(
                "unknown metric: {other}"
            ))),
        }
    }
}

/// Grouping dimension. The order of dimensions in `group_by` defines
/// grouping nesting and result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    TimeBucket,
    ObjectClass,
    Zone,
    Vest,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::TimeBucket => "time_bucket",
            Dimension::ObjectClass => "object_class",
            Dimension::Zone => "zone",
            Dimension::Vest => "vest",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "time_bucket" => Ok(Dimension::TimeBucket),
            "object_class" => Ok(Dimension::ObjectClass),
            "zone" => Ok(Dimension::Zone),
            "vest" => Ok(Dimension::Vest),
            other => Err(EngineError::InvalidQuery(format!(
                "unknown group_by dimension: {other}"
            ))),
        }
    }
}

/// What an aggregation runs over: raw detections or derived close-call
/// events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    #[default]
    Objects,
    Events,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Objects => "objects",
            Entity::Events => "events",
        }
    }
}

/// Filter predicates, AND semantics. Absent predicates impose no
/// constraint; empty collections mean "all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    /// Inclusive lower timestamp bound, ms since epoch.
    pub from_time: Option<i64>,
    /// Inclusive upper timestamp bound, ms since epoch.
    pub to_time: Option<i64>,
    pub object_classes: Vec<ObjectClass>,
    pub zones: Vec<String>,
    pub vest: Option<bool>,
    pub min_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub min_x: Option<f64>,
    pub max_x: Option<f64>,
    pub min_y: Option<f64>,
    pub max_y: Option<f64>,
}

impl FilterSet {
    /// Validate internal coherence. Messages name the offending bound.
    pub fn validate(&self, max_time_range_days: i64) -> Result<()> {
        validate_time_range(self.from_time, self.to_time, max_time_range_days)?;
        for (name, value) in [("min_speed", self.min_speed), ("max_speed", self.max_speed)] {
            if let Some(v) = value {
                if v < 0.0 {
                    return Err(EngineError::InvalidQuery(format!(
                        "{name} must be non-negative, got {v}"
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_speed, self.max_speed) {
            if min > max {
                return Err(EngineError::InvalidQuery(
                    "min_speed cannot exceed max_speed".to_string(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.min_x, self.max_x) {
            if min > max {
                return Err(EngineError::InvalidQuery(
                    "min_x cannot exceed max_x".to_string(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.min_y, self.max_y) {
            if min > max {
                return Err(EngineError::InvalidQuery(
                    "min_y cannot exceed max_y".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The coarse predicate subset the detection store indexes.
    pub fn store_query(&self) -> StoreQuery {
        StoreQuery {
            from_time: self.from_time,
            to_time: self.to_time,
            object_classes: self.object_classes.clone(),
            zones: self.zones.clone(),
        }
    }

    /// Whether a record satisfies every present predicate.
    ///
    /// A bound on an optional field (speed, vest) excludes records missing
    /// that field, matching relational `NULL` semantics.
    pub fn matches<R: AggregateRecord>(&self, record: &R) -> bool {
        if let Some(from) = self.from_time {
            if record.timestamp_ms() < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if record.timestamp_ms() > to {
                return false;
            }
        }
        if !self.object_classes.is_empty()
            && !self.object_classes.contains(&record.object_class())
        {
            return false;
        }
        if !self.zones.is_empty() {
            match record.zone() {
                Some(zone) => {
                    if !self.zones.iter().any(|z| z == zone) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(want) = self.vest {
            if record.vest() != Some(want) {
                return false;
            }
        }
        if self.min_speed.is_some() || self.max_speed.is_some() {
            match record.speed() {
                Some(speed) => {
                    if self.min_speed.is_some_and(|min| speed < min)
                        || self.max_speed.is_some_and(|max| speed > max)
                    {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if self.min_x.is_some_and(|min| record.x() < min)
            || self.max_x.is_some_and(|max| record.x() > max)
            || self.min_y.is_some_and(|min| record.y() < min)
            || self.max_y.is_some_and(|max| record.y() > max)
        {
            return false;
        }
        true
    }

    /// Bounded wall-clock span of the time filter in hours, when both
    /// bounds are present.
    pub fn span_hours(&self) -> Option<f64> {
        match (self.from_time, self.to_time) {
            (Some(from), Some(to)) => Some((to - from) as f64 / 3_600_000.0),
            _ => None,
        }
    }
}

/// Incoming aggregation request, before default resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationRequest {
    pub metric: Metric,
    pub entity: Entity,

    /// Grouping dimensions. Absent defaults to `[time_bucket]`; an
    /// explicitly empty list requests a single point value.
    pub group_by: Option<Vec<Dimension>>,

    pub time_bucket: Option<TimeBucket>,

    #[serde(flatten)]
    pub filters: FilterSet,

    /// Close-call pairing distance, only meaningful for `entity = events`.
    pub distance_threshold: Option<f64>,

    /// Close-call pairing window, only meaningful for `entity = events`.
    pub time_window_ms: Option<i64>,

    /// Skip the cache read but still refresh the stored entry.
    pub force_refresh: bool,
}

/// Fully-resolved aggregation query: every default applied, every
/// parameter validated. This is what gets canonicalized and executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAggregation {
    pub metric: Metric,
    pub entity: Entity,
    pub group_by: Vec<Dimension>,
    pub time_bucket: TimeBucket,
    pub filters: FilterSet,
    /// Close-call pairing parameters; only consulted for `entity = events`.
    pub distance_threshold: f64,
    pub time_window_ms: i64,
}

impl AggregationRequest {
    pub fn resolve(&self, config: &EngineConfig) -> Result<ResolvedAggregation> {
        self.filters.validate(config.query.max_time_range_days)?;

        let group_by = match &self.group_by {
            None => vec![Dimension::TimeBucket],
            Some(dims) => {
                for (i, dim) in dims.iter().enumerate() {
                    if dims[..i].contains(dim) {
                        return Err(EngineError::InvalidQuery(format!(
                            "duplicate group_by dimension: {dim}"
                        )));
                    }
                }
                dims.clone()
            }
        };

        if self.metric == Metric::Rate {
            match (self.filters.from_time, self.filters.to_time) {
                (Some(from), Some(to)) if from < to => {}
                (Some(_), Some(_)) => {
                    return Err(EngineError::InvalidQuery(
                        "rate metric requires a non-empty time range".to_string(),
                    ))
                }
                _ => {
                    return Err(EngineError::InvalidQuery(
                        "rate metric requires both from_time and to_time".to_string(),
                    ))
                }
            }
        }

        let (distance_threshold, time_window_ms) = match self.entity {
            Entity::Events => {
                let dt = self
                    .distance_threshold
                    .unwrap_or(config.close_call.distance_threshold);
                let tw = self.time_window_ms.unwrap_or(config.close_call.time_window_ms);
                if dt <= 0.0 {
                    return Err(EngineError::InvalidQuery(format!(
                        "distance_threshold must be positive, got {dt}"
                    )));
                }
                if tw <= 0 {
                    return Err(EngineError::InvalidQuery(format!(
                        "time_window_ms must be positive, got {tw}"
                    )));
                }
                if self
                    .filters
                    .object_classes
                    .contains(&ObjectClass::Human)
                {
                    return Err(EngineError::InvalidQuery(
                        "object_class filter for entity=events must name vehicle classes"
                            .to_string(),
                    ));
                }
                (dt, tw)
            }
            Entity::Objects => {
                if self.distance_threshold.is_some() || self.time_window_ms.is_some() {
                    return Err(EngineError::InvalidQuery(
                        "distance_threshold/time_window_ms only apply to entity=events"
                            .to_string(),
                    ));
                }
                (
                    config.close_call.distance_threshold,
                    config.close_call.time_window_ms,
                )
            }
        };

        Ok(ResolvedAggregation {
            metric: self.metric,
            entity: self.entity,
            group_by,
            time_bucket: self.time_bucket.unwrap_or(TimeBucket::OneHour),
            filters: self.filters.clone(),
            distance_threshold,
            time_window_ms,
        })
    }
}

fn default_true() -> bool {
    true
}

/// Incoming close-call request, before default resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseCallRequest {
    pub distance_threshold: Option<f64>,
    pub time_window_ms: Option<i64>,
    pub from_time: Option<i64>,
    pub to_time: Option<i64>,
    pub zone: Option<String>,

    /// Narrow the vehicle side to one class. Must be a vehicle class.
    pub object_class: Option<ObjectClass>,

    /// Include the individual event list in the response.
    #[serde(default = "default_true")]
    pub include_details: bool,

    pub force_refresh: bool,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Default for CloseCallRequest {
    fn default() -> Self {
        Self {
            distance_threshold: None,
            time_window_ms: None,
            from_time: None,
            to_time: None,
            zone: None,
            object_class: None,
            include_details: true,
            force_refresh: false,
            page: None,
            page_size: None,
        }
    }
}

/// Fully-resolved close-call query. Pagination and `include_details` are
/// presentation concerns and live outside this (and outside the cache key).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCloseCall {
    pub distance_threshold: f64,
    pub time_window_ms: i64,
    pub from_time: Option<i64>,
    pub to_time: Option<i64>,
    pub zone: Option<String>,
    pub vehicle_class: Option<ObjectClass>,
}

impl CloseCallRequest {
    pub fn resolve(&self, config: &EngineConfig) -> Result<ResolvedCloseCall> {
        let distance_threshold = self
            .distance_threshold
            .unwrap_or(config.close_call.distance_threshold);
        if distance_threshold <= 0.0 {
            return Err(EngineError::InvalidQuery(format!(
                "distance_threshold must be positive, got {distance_threshold}"
            )));
        }

        let time_window_ms = self.time_window_ms.unwrap_or(config.close_call.time_window_ms);
        if time_window_ms <= 0 {
            return Err(EngineError::InvalidQuery(format!(
                "time_window_ms must be positive, got {time_window_ms}"
            )));
        }

        if let (Some(from), Some(to)) = (self.from_time, self.to_time) {
            if from > to {
                return Err(EngineError::InvalidQuery(
                    "from_time cannot be after to_time".to_string(),
                ));
            }
            if to - from > config.query.max_time_range_days * MS_PER_DAY {
                return Err(EngineError::InvalidQuery(format!(
                    "time range cannot exceed {} days",
                    config.query.max_time_range_days
                )));
            }
        }

        if let Some(class) = self.object_class {
            if !class.is_vehicle() {
                return Err(EngineError::InvalidQuery(format!(
                    "object_class must be a vehicle class, got {class}"
                )));
            }
        }

        Ok(ResolvedCloseCall {
            distance_threshold,
            time_window_ms,
            from_time: self.from_time,
            to_time: self.to_time,
            zone: self.zone.clone(),
            vehicle_class: self.object_class,
        })
    }
}

/// Request for a vest-violation scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestViolationRequest {
    pub from_time: Option<i64>,
    pub to_time: Option<i64>,
    pub zone: Option<String>,
    pub force_refresh: bool,
}

impl VestViolationRequest {
    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        validate_time_range(self.from_time, self.to_time, config.query.max_time_range_days)
    }
}

/// Request for an overspeed scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverspeedRequest {
    pub from_time: Option<i64>,
    pub to_time: Option<i64>,
    pub zone: Option<String>,

    /// Single threshold applied to every class. Absent means the per-class
    /// configured limits apply.
    pub speed_threshold: Option<f64>,

    /// Whether humans are scanned too (vehicles always are).
    pub include_humans: bool,

    pub force_refresh: bool,
}

impl OverspeedRequest {
    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        validate_time_range(self.from_time, self.to_time, config.query.max_time_range_days)?;
        if let Some(threshold) = self.speed_threshold {
            if threshold <= 0.0 {
                return Err(EngineError::InvalidQuery(format!(
                    "speed_threshold must be positive, got {threshold}"
                )));
            }
        }
        Ok(())
    }
}

fn validate_time_range(
    from_time: Option<i64>,
    to_time: Option<i64>,
    max_time_range_days: i64,
) -> Result<()> {
    if let (Some(from), Some(to)) = (from_time, to_time) {
        if from > to {
            return Err(EngineError::InvalidQuery(
                "from_time cannot be after to_time".to_string(),
            ));
        }
        if to - from > max_time_range_days * MS_PER_DAY {
            return Err(EngineError::InvalidQuery(format!(
                "time range cannot exceed {max_time_range_days} days"
            )));
        }
    }
    Ok(())
}
