//! Query canonicalization.
//!
//! Turns a fully-resolved query into a stable cache key: every defaulted
//! field is already materialized by resolution, unordered collections are
//! sorted before rendering (so `object_classes=[agv, human]` and
//! `[human, agv]` collide), and `group_by` order is preserved because it
//! changes the result shape. The rendered `key:value` pairs are themselves
//! sorted, joined, and SHA-256 hashed.
//!
//! Pagination, `include_details` and `force_refresh` never enter the key:
//! they change the response shape or the cache policy, not the computed
//! result.

use crate::query::{ResolvedAggregation, ResolvedCloseCall};
use sha2::{Digest, Sha256};
use std::fmt;

/// Canonical, hashed representation of a resolved query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hashed_key(prefix: &str, kind: &str, mut pairs: Vec<String>) -> CacheKey {
    pairs.sort();
    let param_string = pairs.join("|");

    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(param_string.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    CacheKey(format!("{prefix}:{kind}:{digest}"))
}

fn push_opt<T: fmt::Display>(pairs: &mut Vec<String>, name: &str, value: &Option<T>) {
    if let Some(v) = value {
        pairs.push(format!("{name}:{v}"));
    }
}

/// Cache key for an aggregation query.
pub fn aggregation_key(prefix: &str, query: &ResolvedAggregation) -> CacheKey {
    let mut pairs = vec![
        format!("metric:{}", query.metric),
        format!("entity:{}", query.entity.as_str()),
        format!("time_bucket:{}", query.time_bucket),
    ];

    // group_by order is semantic; keep it inside one pair.
    let dims: Vec<&str> = query.group_by.iter().map(|d| d.as_str()).collect();
    pairs.push(format!("group_by:{}", dims.join(",")));

    let filters = &query.filters;
    push_opt(&mut pairs, "from_time", &filters.from_time);
    push_opt(&mut pairs, "to_time", &filters.to_time);
    push_opt(&mut pairs, "vest", &filters.vest);
    push_opt(&mut pairs, "min_speed", &filters.min_speed);
    push_opt(&mut pairs, "max_speed", &filters.max_speed);
    push_opt(&mut pairs, "min_x", &filters.min_x);
    push_opt(&mut pairs, "max_x", &filters.max_x);
    push_opt(&mut pairs, "min_y", &filters.min_y);
    push_opt(&mut pairs, "max_y", &filters.max_y);

    if !filters.object_classes.is_empty() {
        let mut classes: Vec<&str> =
            filters.object_classes.iter().map(|c| c.as_str()).collect();
        classes.sort_unstable();
        classes.dedup();
        pairs.push(format!("object_classes:{}", classes.join(",")));
    }
    if !filters.zones.is_empty() {
        let mut zones: Vec<&str> = filters.zones.iter().map(String::as_str).collect();
        zones.sort_unstable();
        zones.dedup();
        pairs.push(format!("zones:{}", zones.join(",")));
    }

    if query.entity == crate::query::Entity::Events {
        pairs.push(format!("distance_threshold:{}", query.distance_threshold));
        pairs.push(format!("time_window_ms:{}", query.time_window_ms));
    }

    hashed_key(prefix, "agg", pairs)
}

/// Cache key for a close-call query.
pub fn close_call_key(prefix: &str, query: &ResolvedCloseCall) -> CacheKey {
    let mut pairs = vec![
        format!("distance_threshold:{}", query.distance_threshold),
        format!("time_window_ms:{}", query.time_window_ms),
    ];
    push_opt(&mut pairs, "from_time", &query.from_time);
    push_opt(&mut pairs, "to_time", &query.to_time);
    push_opt(&mut pairs, "zone", &query.zone);
    push_opt(&mut pairs, "object_class", &query.vehicle_class);

    hashed_key(prefix, "closecall", pairs)
}

/// Cache key for a vest-violation scan.
pub fn vest_violation_key(prefix: &str, query: &crate::query::VestViolationRequest) -> CacheKey {
    let mut pairs = Vec::new();
    push_opt(&mut pairs, "from_time", &query.from_time);
    push_opt(&mut pairs, "to_time", &query.to_time);
    push_opt(&mut pairs, "zone", &query.zone);
    hashed_key(prefix, "vest", pairs)
}

/// Cache key for an overspeed scan.
pub fn overspeed_key(prefix: &str, query: &crate::query::OverspeedRequest) -> CacheKey {
    let mut pairs = vec![format!("include_humans:{}", query.include_humans)];
    push_opt(&mut pairs, "from_time", &query.from_time);
    push_opt(&mut pairs, "to_time", &query.to_time);
    push_opt(&mut pairs, "zone", &query.zone);
    push_opt(&mut pairs, "speed_threshold", &query.speed_threshold);
    hashed_key(prefix, "overspeed", pairs)
}

#[cfg(test)]
pub(crate) fn tests_key(s: &str) -> CacheKey {
    CacheKey(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::query::{AggregationRequest, CloseCallRequest, Dimension, FilterSet};
    use sitesense_core::{ObjectClass, TimeBucket};

    fn resolve(request: &AggregationRequest) -> ResolvedAggregation {
        request.resolve(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_defaulted_fields_collide_with_explicit_ones() {
        let implicit = resolve(&AggregationRequest::default());
        let explicit = resolve(&AggregationRequest {
            group_by: Some(vec![Dimension::TimeBucket]),
            time_bucket: Some(TimeBucket::OneHour),
            ..Default::default()
        });
        assert_eq!(
            aggregation_key("t", &implicit),
            aggregation_key("t", &explicit)
        );
    }

    #[test]
    fn test_class_set_order_insensitive() {
        let a = resolve(&AggregationRequest {
            filters: FilterSet {
                object_classes: vec![ObjectClass::Agv, ObjectClass::Human],
                ..Default::default()
            },
            ..Default::default()
        });
        let b = resolve(&AggregationRequest {
            filters: FilterSet {
                object_classes: vec![ObjectClass::Human, ObjectClass::Agv],
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(aggregation_key("t", &a), aggregation_key("t", &b));
    }

    #[test]
    fn test_group_by_order_sensitive() {
        let a = resolve(&AggregationRequest {
            group_by: Some(vec![Dimension::Zone, Dimension::ObjectClass]),
            ..Default::default()
        });
        let b = resolve(&AggregationRequest {
            group_by: Some(vec![Dimension::ObjectClass, Dimension::Zone]),
            ..Default::default()
        });
        assert_ne!(aggregation_key("t", &a), aggregation_key("t", &b));
    }

    #[test]
    fn test_point_query_differs_from_series_query() {
        let point = resolve(&AggregationRequest {
            group_by: Some(vec![]),
            ..Default::default()
        });
        let series = resolve(&AggregationRequest::default());
        assert_ne!(aggregation_key("t", &point), aggregation_key("t", &series));
    }

    #[test]
    fn test_filter_values_change_the_key() {
        let a = resolve(&AggregationRequest::default());
        let b = resolve(&AggregationRequest {
            filters: FilterSet {
                zones: vec!["dock".to_string()],
                ..Default::default()
            },
            ..Default::default()
        });
        assert_ne!(aggregation_key("t", &a), aggregation_key("t", &b));
    }

    #[test]
    fn test_close_call_key_ignores_pagination() {
        let config = EngineConfig::default();
        let a = CloseCallRequest {
            page: Some(1),
            include_details: true,
            ..Default::default()
        }
        .resolve(&config)
        .unwrap();
        let b = CloseCallRequest {
            page: Some(7),
            page_size: Some(50),
            include_details: false,
            force_refresh: true,
            ..Default::default()
        }
        .resolve(&config)
        .unwrap();
        assert_eq!(close_call_key("t", &a), close_call_key("t", &b));
    }

    #[test]
    fn test_close_call_key_varies_with_threshold() {
        let config = EngineConfig::default();
        let a = CloseCallRequest::default().resolve(&config).unwrap();
        let b = CloseCallRequest {
            distance_threshold: Some(3.5),
            ..Default::default()
        }
        .resolve(&config)
        .unwrap();
        assert_ne!(close_call_key("t", &a), close_call_key("t", &b));
    }

    #[test]
    fn test_aggregation_and_close_call_keys_never_collide() {
        let config = EngineConfig::default();
        let agg = resolve(&AggregationRequest::default());
        let cc = CloseCallRequest::default().resolve(&config).unwrap();
        assert_ne!(
            aggregation_key("t", &agg).as_str(),
            close_call_key("t", &cc).as_str()
        );
    }
}
