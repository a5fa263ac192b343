//! Generic aggregation engine.
//!
//! Executes a resolved query over a slice of records: filter first (AND
//! semantics), truncate timestamps when grouping by time bucket, partition
//! by the ordered dimension tuple, compute one metric value per partition.
//!
//! The engine is generic over [`AggregateRecord`] so close-call events run
//! through exactly the same machinery as raw detections: a count-by-zone of
//! near misses is the same code path as a count-by-zone of detections.
//!
//! Determinism: partitions live in a `BTreeMap` keyed by the dimension
//! tuple, so output order is ascending by the first dimension (time, when
//! grouping by `time_bucket`) with lexicographic tie-break on the rest,
//! regardless of input order.

use crate::error::{EngineError, Result};
use crate::guard::{ExecutionGuard, CHECK_INTERVAL};
use crate::query::{Dimension, Metric, ResolvedAggregation};
use serde::{Deserialize, Serialize};
use sitesense_core::{time, CloseCallEvent, Detection, ObjectClass};
use std::collections::{BTreeMap, HashSet};

/// Row shape the aggregation engine consumes. Detections implement this
/// directly; derived events implement it by delegating to their vehicle
/// side (class, tracking id) and their human side (position).
pub trait AggregateRecord {
    fn timestamp_ms(&self) -> i64;
    fn tracking_id(&self) -> &str;
    fn object_class(&self) -> ObjectClass;
    fn x(&self) -> f64;
    fn y(&self) -> f64;
    fn zone(&self) -> Option<&str>;
    fn speed(&self) -> Option<f64>;
    fn vest(&self) -> Option<bool>;
}

impl AggregateRecord for Detection {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
    fn tracking_id(&self) -> &str {
        &self.tracking_id
    }
    fn object_class(&self) -> ObjectClass {
        self.object_class
    }
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
    fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }
    fn speed(&self) -> Option<f64> {
        self.speed
    }
    fn vest(&self) -> Option<bool> {
        self.vest
    }
}

impl AggregateRecord for CloseCallEvent {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
    /// Events are attributed to the vehicle involved, so `unique_ids`
    /// counts distinct offending vehicles.
    fn tracking_id(&self) -> &str {
        &self.vehicle_tracking_id
    }
    fn object_class(&self) -> ObjectClass {
        self.vehicle_class
    }
    /// Position of the human involved, the subject being protected.
    fn x(&self) -> f64 {
        self.human_x
    }
    fn y(&self) -> f64 {
        self.human_y
    }
    fn zone(&self) -> Option<&str> {
        self.zone()
    }
    fn speed(&self) -> Option<f64> {
        None
    }
    fn vest(&self) -> Option<bool> {
        None
    }
}

/// One dimension value inside a group key. Ordering of the enum follows
/// the group_by declaration order at runtime, so derived `Ord` gives the
/// documented output ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum DimValue {
    Time(i64),
    Class(ObjectClass),
    Zone(Option<String>),
    Vest(Option<bool>),
}

/// One output row: the group's dimension values plus the metric value.
///
/// Dimensions are flattened into the row (`{"time": ..., "object_class":
/// ..., "value": ...}`), mirroring what chart consumers read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    #[serde(flatten)]
    pub dimensions: serde_json::Map<String, serde_json::Value>,
    pub value: f64,
}

impl SeriesRow {
    pub fn dimension(&self, name: &str) -> Option<&serde_json::Value> {
        self.dimensions.get(name)
    }
}

/// Run a resolved aggregation over `records`.
pub fn aggregate<R: AggregateRecord>(
    query: &ResolvedAggregation,
    records: &[R],
    guard: &ExecutionGuard,
) -> Result<Vec<SeriesRow>> {
    let mut filtered: Vec<&R> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if i % CHECK_INTERVAL == 0 {
            guard.check()?;
        }
        if query.filters.matches(record) {
            filtered.push(record);
        }
    }

    if query.group_by.is_empty() {
        // Point value: always exactly one row, even over an empty set.
        let value = compute_metric(query, &filtered)?;
        return Ok(vec![SeriesRow {
            dimensions: serde_json::Map::new(),
            value,
        }]);
    }

    let mut partitions: BTreeMap<Vec<DimValue>, Vec<&R>> = BTreeMap::new();
    for (i, record) in filtered.iter().copied().enumerate() {
        if i % CHECK_INTERVAL == 0 {
            guard.check()?;
        }
        let key: Vec<DimValue> = query
            .group_by
            .iter()
            .map(|dim| dim_value(*dim, record, query))
            .collect();
        partitions.entry(key).or_default().push(record);
    }

    let mut rows = Vec::with_capacity(partitions.len());
    for (key, members) in &partitions {
        guard.check()?;
        let value = compute_metric(query, members)?;
        rows.push(SeriesRow {
            dimensions: render_dimensions(&query.group_by, key),
            value,
        });
    }
    Ok(rows)
}

fn dim_value<R: AggregateRecord>(
    dim: Dimension,
    record: &R,
    query: &ResolvedAggregation,
) -> DimValue {
    match dim {
        Dimension::TimeBucket => {
            DimValue::Time(query.time_bucket.truncate(record.timestamp_ms()))
        }
        Dimension::ObjectClass => DimValue::Class(record.object_class()),
        Dimension::Zone => DimValue::Zone(record.zone().map(str::to_string)),
        Dimension::Vest => DimValue::Vest(record.vest()),
    }
}

fn render_dimensions(
    dims: &[Dimension],
    key: &[DimValue],
) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    for (dim, value) in dims.iter().zip(key) {
        match (dim, value) {
            (Dimension::TimeBucket, DimValue::Time(bucket_start)) => {
                out.insert(
                    "time".to_string(),
                    serde_json::Value::String(time::format_iso_millis(*bucket_start)),
                );
            }
            (Dimension::ObjectClass, DimValue::Class(class)) => {
                out.insert(
                    "object_class".to_string(),
                    serde_json::Value::String(class.as_str().to_string()),
                );
            }
            (Dimension::Zone, DimValue::Zone(zone)) => {
                out.insert(
                    "zone".to_string(),
                    zone.as_ref()
                        .map(|z| serde_json::Value::String(z.clone()))
                        .unwrap_or(serde_json::Value::Null),
                );
            }
            (Dimension::Vest, DimValue::Vest(vest)) => {
                out.insert(
                    "vest".to_string(),
                    vest.map(serde_json::Value::Bool)
                        .unwrap_or(serde_json::Value::Null),
                );
            }
            // dims and key are built in lockstep; a mismatch is a bug.
            _ => unreachable!("dimension tuple out of step with group_by"),
        }
    }
    out
}

fn compute_metric<R: AggregateRecord>(
    query: &ResolvedAggregation,
    members: &[&R],
) -> Result<f64> {
    match query.metric {
        Metric::Count => Ok(members.len() as f64),
        Metric::UniqueIds => {
            let distinct: HashSet<&str> = members.iter().map(|r| r.tracking_id()).collect();
            Ok(distinct.len() as f64)
        }
        Metric::AvgSpeed => {
            let speeds: Vec<f64> = members.iter().filter_map(|r| r.speed()).collect();
            // Partitions with no speed data yield 0, not null, so chart
            // consumers stay simple.
            if speeds.is_empty() {
                Ok(0.0)
            } else {
                Ok(speeds.iter().sum::<f64>() / speeds.len() as f64)
            }
        }
        Metric::VestCompliance => {
            let humans_with_data: Vec<bool> = members
                .iter()
                .filter(|r| r.object_class() == ObjectClass::Human)
                .filter_map(|r| r.vest())
                .collect();
            if humans_with_data.is_empty() {
                Ok(0.0)
            } else {
                let compliant = humans_with_data.iter().filter(|v| **v).count();
                Ok(compliant as f64 / humans_with_data.len() as f64 * 100.0)
            }
        }
        Metric::Rate => {
            // Bucketed series rate each bucket over its own width;
            // everything else rates over the query's bounded span.
            let hours = if query.group_by.contains(&Dimension::TimeBucket) {
                query.time_bucket.width_hours()
            } else {
                query.filters.span_hours().ok_or_else(|| {
                    EngineError::InvalidQuery(
                        "rate metric requires both from_time and to_time".to_string(),
                    )
                })?
            };
            if hours <= 0.0 {
                return Err(EngineError::InvalidQuery(
                    "rate metric requires a non-empty time range".to_string(),
                ));
            }
            Ok(members.len() as f64 / hours)
        }
    }
}
