//! End-to-end facade tests over the in-memory store and cache.

use async_trait::async_trait;
use sitesense_core::{Detection, ObjectClass};
use sitesense_engine::{
    AggregationRequest, AnalyticsService, CacheError, CacheKey, Dimension, EngineConfig, Entity,
    EngineError, FilterSet, LatestDetectionsRequest, MemoryResultCache, Metric, OverspeedRequest,
    ResultCache, VestViolationRequest,
};
use sitesense_store::{DetectionStore, MemoryDetectionStore, StoreError, StoreQuery};
use std::sync::Arc;
use std::time::Duration;

fn det(ts: i64, id: &str, class: ObjectClass) -> Detection {
    Detection {
        timestamp: ts,
        tracking_id: id.to_string(),
        object_class: class,
        x: 0.0,
        y: 0.0,
        zone: None,
        speed: None,
        vest: None,
        heading: None,
    }
}

/// A few hours of mixed traffic: humans with vests and speeds, vehicles,
/// pallet trucks, an AGV, some unzoned rows.
fn fixture() -> Vec<Detection> {
    let mut rows = Vec::new();
    for i in 0..40i64 {
        let mut d = det(i * 60_000, &format!("h{}", i % 7), ObjectClass::Human);
        d.zone = if i % 3 == 0 {
            Some("dock".to_string())
        } else {
            Some("aisle-1".to_string())
        };
        d.vest = Some(i % 4 != 0);
        d.speed = Some(1.0 + (i % 3) as f64);
        d.x = (i % 10) as f64;
        d.y = (i % 5) as f64;
        rows.push(d);
    }
    for i in 0..20i64 {
        let class = match i % 3 {
            0 => ObjectClass::Vehicle,
            1 => ObjectClass::PalletTruck,
            _ => ObjectClass::Agv,
        };
        let mut d = det(i * 120_000 + 500, &format!("v{}", i % 5), class);
        d.zone = Some("dock".to_string());
        d.speed = Some(3.0 + (i % 4) as f64);
        d.x = 50.0 + i as f64;
        rows.push(d);
    }
    rows
}

fn service(rows: Vec<Detection>) -> AnalyticsService {
    let store = Arc::new(MemoryDetectionStore::new(rows));
    AnalyticsService::with_memory_cache(store, EngineConfig::default())
}

#[tokio::test]
async fn test_point_count_matches_brute_force() {
    let rows = fixture();
    let filters = FilterSet {
        from_time: Some(10 * 60_000),
        to_time: Some(30 * 60_000),
        object_classes: vec![ObjectClass::Human],
        zones: vec!["dock".to_string()],
        ..Default::default()
    };
    let expected = rows
        .iter()
        .filter(|d| {
            d.timestamp >= 10 * 60_000
                && d.timestamp <= 30 * 60_000
                && d.object_class == ObjectClass::Human
                && d.zone.as_deref() == Some("dock")
        })
        .count() as f64;

    let svc = service(rows);
    let response = svc
        .aggregate(&AggregationRequest {
            group_by: Some(vec![]),
            filters,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.series.len(), 1);
    assert_eq!(response.series[0].value, expected);
    assert!(expected > 0.0);
}

#[tokio::test]
async fn test_identical_calls_hit_the_cache() {
    let svc = service(fixture());
    let request = AggregationRequest {
        group_by: Some(vec![Dimension::ObjectClass]),
        ..Default::default()
    };

    let first = svc.aggregate(&request).await.unwrap();
    assert!(!first.meta.cached);
    assert_eq!(first.meta.cache_ttl, None);

    let second = svc.aggregate(&request).await.unwrap();
    assert!(second.meta.cached);
    assert!(second.meta.cache_ttl.is_some());
    assert_eq!(first.series, second.series);
    assert_eq!(first.meta.total_results, second.meta.total_results);
}

#[tokio::test]
async fn test_force_refresh_always_reports_uncached() {
    let svc = service(fixture());
    let request = AggregationRequest::default();

    // Warm the cache.
    svc.aggregate(&request).await.unwrap();
    assert!(svc.aggregate(&request).await.unwrap().meta.cached);

    let forced = svc
        .aggregate(&AggregationRequest {
            force_refresh: true,
            ..request.clone()
        })
        .await
        .unwrap();
    assert!(!forced.meta.cached);

    // force_refresh re-warmed the cache rather than disabling it.
    assert!(svc.aggregate(&request).await.unwrap().meta.cached);
}

#[tokio::test]
async fn test_invalidate_all_clears_the_cache() {
    let svc = service(fixture());
    let request = AggregationRequest::default();

    svc.aggregate(&request).await.unwrap();
    assert!(svc.aggregate(&request).await.unwrap().meta.cached);

    svc.invalidate_all().await;
    assert!(!svc.aggregate(&request).await.unwrap().meta.cached);
}

#[tokio::test]
async fn test_semantically_equal_requests_share_a_cache_entry() {
    let svc = service(fixture());

    svc.aggregate(&AggregationRequest::default()).await.unwrap();

    // Spelling out the defaults lands on the same canonical key.
    let explicit = svc
        .aggregate(&AggregationRequest {
            group_by: Some(vec![Dimension::TimeBucket]),
            time_bucket: Some(sitesense_core::TimeBucket::OneHour),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(explicit.meta.cached);
}

struct FailingStore;

#[async_trait]
impl DetectionStore for FailingStore {
    async fn query(&self, _query: &StoreQuery) -> Result<Vec<Detection>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_failure_propagates_not_empty() {
    let svc =
        AnalyticsService::with_memory_cache(Arc::new(FailingStore), EngineConfig::default());
    let err = svc.aggregate(&AggregationRequest::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
}

struct FailingCache;

#[async_trait]
impl ResultCache for FailingCache {
    async fn get(
        &self,
        _key: &CacheKey,
    ) -> Result<Option<sitesense_engine::CacheEntry>, CacheError> {
        Err(CacheError::Unavailable("redis down".to_string()))
    }

    async fn put(
        &self,
        _key: CacheKey,
        _value: serde_json::Value,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("redis down".to_string()))
    }

    async fn invalidate(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("redis down".to_string()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("redis down".to_string()))
    }
}

#[tokio::test]
async fn test_cache_failure_degrades_to_always_miss() {
    let store = Arc::new(MemoryDetectionStore::new(fixture()));
    let svc = AnalyticsService::new(store, Arc::new(FailingCache), EngineConfig::default());
    let request = AggregationRequest::default();

    // Both calls succeed, neither is served from cache.
    let first = svc.aggregate(&request).await.unwrap();
    let second = svc.aggregate(&request).await.unwrap();
    assert!(!first.meta.cached);
    assert!(!second.meta.cached);
    assert_eq!(first.series, second.series);
}

#[tokio::test]
async fn test_rate_without_bounds_is_invalid_at_the_facade() {
    let svc = service(fixture());
    let err = svc
        .aggregate(&AggregationRequest {
            metric: Metric::Rate,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidQuery(_)));
    assert!(err.to_string().contains("from_time"));
}

#[tokio::test]
async fn test_events_entity_aggregates_close_calls() {
    // One human next to one vehicle inside the pairing window.
    let mut rows = vec![det(1000, "H1", ObjectClass::Human)];
    let mut v = det(1020, "V1", ObjectClass::Vehicle);
    v.x = 1.0;
    rows.push(v);
    // A far-away vehicle contributes no event.
    let mut far = det(1020, "V2", ObjectClass::Vehicle);
    far.x = 100.0;
    rows.push(far);

    let svc = service(rows);
    let response = svc
        .aggregate(&AggregationRequest {
            entity: Entity::Events,
            group_by: Some(vec![]),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.series.len(), 1);
    assert_eq!(response.series[0].value, 1.0);
}

#[tokio::test]
async fn test_events_entity_groups_by_vehicle_class() {
    let mut rows = Vec::new();
    // Encounters far apart in time so they never merge.
    for (i, class) in [ObjectClass::Vehicle, ObjectClass::Agv, ObjectClass::Agv]
        .iter()
        .enumerate()
    {
        let t = i as i64 * 3_600_000;
        rows.push(det(t, &format!("H{i}"), ObjectClass::Human));
        let mut v = det(t + 50, &format!("V{i}"), *class);
        v.x = 1.0;
        rows.push(v);
    }

    let svc = service(rows);
    let response = svc
        .aggregate(&AggregationRequest {
            entity: Entity::Events,
            group_by: Some(vec![Dimension::ObjectClass]),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.series.len(), 2);
    assert_eq!(response.series[0].dimension("object_class").unwrap(), "vehicle");
    assert_eq!(response.series[0].value, 1.0);
    assert_eq!(response.series[1].dimension("object_class").unwrap(), "agv");
    assert_eq!(response.series[1].value, 2.0);
}

#[tokio::test]
async fn test_timeout_surfaces_as_timeout_error() {
    let store = Arc::new(MemoryDetectionStore::new(fixture()));
    let config = EngineConfig {
        query: sitesense_engine::QueryConfig {
            default_timeout_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let svc = AnalyticsService::with_memory_cache(store, config);

    let err = svc.aggregate(&AggregationRequest::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(0)));

    // A timed-out computation must not have cached anything.
    let err = svc.aggregate(&AggregationRequest::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(0)));
}

#[tokio::test]
async fn test_cancellation_stops_computation() {
    let svc = service(fixture());
    svc.cancellation_token().cancel();

    let err = svc.aggregate(&AggregationRequest::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn test_dashboard_metrics() {
    let svc = service(fixture());
    let metrics = svc.dashboard_metrics().await.unwrap();

    assert_eq!(metrics.active_humans, 7);
    assert_eq!(metrics.active_vehicles, 5);
    assert_eq!(metrics.detection_volume, 60);
    // 40 humans with vest data, i % 4 != 0 → 30 compliant.
    assert!((metrics.vest_compliance - 75.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_latest_detections_newest_first_with_clamped_limit() {
    let svc = service(fixture());

    let result = svc
        .latest_detections(&LatestDetectionsRequest {
            limit: Some(5), // below floor, clamps to 20
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 20);
    let times: Vec<i64> = result.detections.iter().map(|d| d.timestamp).collect();
    let mut sorted = times.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(times, sorted);

    let filtered = svc
        .latest_detections(&LatestDetectionsRequest {
            object_classes: vec![ObjectClass::Agv],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(filtered
        .detections
        .iter()
        .all(|d| d.object_class == ObjectClass::Agv));
}

#[tokio::test]
async fn test_vest_violation_report_and_cache_provenance() {
    let svc = service(fixture());
    let request = VestViolationRequest::default();

    let first = svc.vest_violations(&request).await.unwrap();
    // i % 4 == 0 → vest false, 10 of 40 human rows.
    assert_eq!(first.summary.total_count, 10);
    assert!(first.summary.unique_humans > 0);
    assert!(!first.cache_metadata.cached);

    let second = svc.vest_violations(&request).await.unwrap();
    assert!(second.cache_metadata.cached);
    assert_eq!(second.summary, first.summary);
    assert_eq!(second.computed_at, first.computed_at);
}

#[tokio::test]
async fn test_overspeed_report_with_override() {
    let svc = service(fixture());

    let report = svc
        .overspeed_events(&OverspeedRequest {
            speed_threshold: Some(5.5),
            ..Default::default()
        })
        .await
        .unwrap();
    // Vehicle speeds are 3.0..=6.0; only the 6.0 rows exceed 5.5.
    assert!(report.summary.total_count > 0);
    assert_eq!(report.summary.speed_threshold, Some(5.5));
    assert_eq!(report.summary.max_speed, 6.0);
    assert!(report
        .summary
        .by_object_class
        .iter()
        .all(|c| c.object_class.is_vehicle()));

    let err = svc
        .overspeed_events(&OverspeedRequest {
            speed_threshold: Some(-1.0),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_concurrent_identical_misses_both_succeed() {
    let svc = Arc::new(service(fixture()));
    let request = AggregationRequest::default();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let svc = svc.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move { svc.aggregate(&request).await }));
    }

    let mut series = Vec::new();
    for handle in handles {
        series.push(handle.await.unwrap().unwrap().series);
    }
    for s in &series[1..] {
        assert_eq!(s, &series[0]);
    }
}

#[tokio::test]
async fn test_shared_cache_across_query_kinds() {
    // One cache instance serves both aggregation and violation queries
    // without key collisions.
    let store = Arc::new(MemoryDetectionStore::new(fixture()));
    let cache = Arc::new(MemoryResultCache::new(64));
    let svc = AnalyticsService::new(store, cache.clone(), EngineConfig::default());

    svc.aggregate(&AggregationRequest::default()).await.unwrap();
    svc.vest_violations(&VestViolationRequest::default())
        .await
        .unwrap();

    assert_eq!(cache.stats().await.entries, 2);
}
