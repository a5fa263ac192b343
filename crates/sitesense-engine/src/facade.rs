//! Query facade.
//!
//! [`AnalyticsService`] is the single entry point callers (the REST layer,
//! embedders, tests) talk to. Every operation follows the same shape:
//! canonicalize → cache lookup (skipped on `force_refresh`) → fetch from
//! the detection store → engine/matcher dispatch → cache store → shape the
//! response.
//!
//! ## Cache provenance
//!
//! Stored payloads carry `cached: true`, so a cache hit reports its
//! provenance without rewriting the payload; the call that computed the
//! result reports `cached: false`. `force_refresh` skips the read but
//! still refreshes the stored entry.
//!
//! ## Failure policy
//!
//! Store errors propagate (`EngineError::Store`); cache errors and corrupt
//! cached payloads degrade to a miss with a warning. A computation that
//! times out or is cancelled returns before the cache store, so partial
//! results are never cached.

use crate::aggregate::{aggregate, SeriesRow};
use crate::cache::{CacheEntry, ResultCache};
use crate::canonical::{self, CacheKey};
use crate::closecall::{
    match_close_calls, summarize, MatcherStats, SeverityBreakdown, TimeSeriesPoint,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::guard::ExecutionGuard;
use crate::query::{
    AggregationRequest, CloseCallRequest, Entity, Metric, OverspeedRequest, ResolvedAggregation,
    ResolvedCloseCall, VestViolationRequest,
};
use crate::violations::{scan_overspeed, scan_vest_violations, OverspeedSummary, VestViolationSummary};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sitesense_core::{time, CloseCallEvent, Detection, ObjectClass};
use sitesense_observability::metrics;
use sitesense_store::{DetectionStore, StoreQuery};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Aggregation response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMeta {
    pub metric: Metric,
    pub bucket: String,
    pub total_results: usize,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
}

/// Aggregation response: one row per group plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub series: Vec<SeriesRow>,
    pub meta: AggregateMeta,
}

/// Cache provenance attached to report-style responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
}

/// 1-indexed page metadata. An out-of-range page yields an empty page,
/// never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub count: u64,
    pub page: u32,
    pub pages: u32,
    pub page_size: u32,
}

/// Echo of the parameters a close-call report was computed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseCallParameters {
    pub distance_threshold: f64,
    pub time_window_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_class: Option<ObjectClass>,
}

impl CloseCallParameters {
    fn from_resolved(resolved: &ResolvedCloseCall) -> Self {
        Self {
            distance_threshold: resolved.distance_threshold,
            time_window_ms: resolved.time_window_ms,
            from_time: resolved.from_time.map(time::format_iso_millis),
            to_time: resolved.to_time.map(time::format_iso_millis),
            zone: resolved.zone.clone(),
            object_class: resolved.vehicle_class,
        }
    }
}

/// Full close-call report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseCallReport {
    pub total_count: u64,
    pub by_vehicle_class: BTreeMap<ObjectClass, u64>,
    pub by_severity: SeverityBreakdown,
    pub time_series: Vec<TimeSeriesPoint>,

    /// Individual events for the requested page. Omitted when the request
    /// asked for `include_details: false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_calls: Option<Vec<CloseCallEvent>>,

    pub statistics: MatcherStats,
    pub parameters_used: CloseCallParameters,
    pub computed_at: String,
    pub cache_metadata: CacheMetadata,
    pub pagination: Pagination,
}

/// Vest-violation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VestViolationReport {
    #[serde(flatten)]
    pub summary: VestViolationSummary,
    pub computed_at: String,
    pub cache_metadata: CacheMetadata,
}

/// Overspeed report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverspeedReport {
    #[serde(flatten)]
    pub summary: OverspeedSummary,
    pub computed_at: String,
    pub cache_metadata: CacheMetadata,
}

/// Dashboard top-card snapshot. Always computed fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub active_humans: u64,
    pub active_vehicles: u64,
    pub detection_volume: u64,
    pub vest_compliance: f64,
}

/// Request for the latest-detections sanity table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatestDetectionsRequest {
    /// Clamped to 20..=50.
    pub limit: Option<u32>,
    pub object_classes: Vec<ObjectClass>,
    pub zones: Vec<String>,
    pub vest: Option<bool>,
}

/// Newest-first detection rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestDetections {
    pub detections: Vec<Detection>,
    pub total: u64,
}

/// Orchestrates canonicalization, caching, store access and engine
/// dispatch for all query kinds.
pub struct AnalyticsService {
    store: Arc<dyn DetectionStore>,
    cache: Arc<dyn ResultCache>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn DetectionStore>,
        cache: Arc<dyn ResultCache>,
        config: EngineConfig,
    ) -> Self {
        metrics::init();
        Self {
            store,
            cache,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Convenience constructor backed by an in-memory result cache sized
    /// from the config.
    pub fn with_memory_cache(store: Arc<dyn DetectionStore>, config: EngineConfig) -> Self {
        let cache = Arc::new(crate::cache::MemoryResultCache::new(config.cache.capacity));
        Self::new(store, cache, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token cancelling every in-flight and future computation on this
    /// service. Used for graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drop every cached result.
    pub async fn invalidate_all(&self) {
        if let Err(e) = self.cache.clear().await {
            tracing::warn!(error = %e, "Failed to clear result cache");
        }
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    /// Run a generic aggregation query.
    pub async fn aggregate(&self, request: &AggregationRequest) -> Result<AggregateResponse> {
        let timer = metrics::QUERY_LATENCY
            .with_label_values(&["aggregate"])
            .start_timer();
        let result = self.aggregate_inner(request).await;
        timer.observe_duration();
        metrics::QUERIES_TOTAL
            .with_label_values(&["aggregate", status_label(&result)])
            .inc();
        result
    }

    async fn aggregate_inner(&self, request: &AggregationRequest) -> Result<AggregateResponse> {
        let resolved = request.resolve(&self.config)?;
        let key = canonical::aggregation_key(&self.config.cache.key_prefix, &resolved);

        if !request.force_refresh {
            if let Some(response) = self.cache_lookup::<AggregateResponse>(&key).await {
                return Ok(response);
            }
        }

        let guard = self.guard();
        let ttl = self.config.cache.ttl_for_bucket(resolved.time_bucket);

        let series = match resolved.entity {
            Entity::Objects => {
                let detections = self.store.query(&resolved.filters.store_query()).await?;
                metrics::DETECTIONS_SCANNED_TOTAL
                    .with_label_values(&["aggregate"])
                    .inc_by(detections.len() as u64);
                aggregate(&resolved, &detections, &guard)?
            }
            Entity::Events => {
                let events = self.compute_events(&resolved, &guard).await?;
                aggregate(&resolved, &events, &guard)?
            }
        };

        let mut response = AggregateResponse {
            meta: AggregateMeta {
                metric: resolved.metric,
                bucket: resolved.time_bucket.as_str().to_string(),
                total_results: series.len(),
                cached: true,
                cache_ttl: Some(ttl.as_secs()),
            },
            series,
        };

        self.cache_store(key, &response, ttl).await;

        response.meta.cached = false;
        response.meta.cache_ttl = None;
        Ok(response)
    }

    /// Derive close-call events for `entity = events` aggregation.
    async fn compute_events(
        &self,
        resolved: &ResolvedAggregation,
        guard: &ExecutionGuard,
    ) -> Result<Vec<CloseCallEvent>> {
        let filters = &resolved.filters;

        let vehicle_classes: Vec<ObjectClass> = if filters.object_classes.is_empty() {
            ObjectClass::VEHICLES.to_vec()
        } else {
            filters
                .object_classes
                .iter()
                .copied()
                .filter(|c| c.is_vehicle())
                .collect()
        };

        let pairing = ResolvedCloseCall {
            distance_threshold: resolved.distance_threshold,
            time_window_ms: resolved.time_window_ms,
            from_time: filters.from_time,
            to_time: filters.to_time,
            zone: None,
            vehicle_class: None,
        };

        let (events, _stats) = self
            .run_matcher(&pairing, &filters.zones, &vehicle_classes, guard)
            .await?;
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Close calls
    // ------------------------------------------------------------------

    /// Compute (or serve from cache) a close-call report.
    pub async fn close_calls(&self, request: &CloseCallRequest) -> Result<CloseCallReport> {
        let timer = metrics::QUERY_LATENCY
            .with_label_values(&["close_calls"])
            .start_timer();
        let result = self.close_calls_inner(request).await;
        timer.observe_duration();
        metrics::QUERIES_TOTAL
            .with_label_values(&["close_calls", status_label(&result)])
            .inc();
        result
    }

    async fn close_calls_inner(&self, request: &CloseCallRequest) -> Result<CloseCallReport> {
        let resolved = request.resolve(&self.config)?;

        let page = request.page.unwrap_or(1);
        if page == 0 {
            return Err(EngineError::InvalidQuery("page must be >= 1".to_string()));
        }
        let page_size = request
            .page_size
            .unwrap_or(self.config.query.default_page_size)
            .clamp(1, self.config.query.max_page_size);

        let key = canonical::close_call_key(&self.config.cache.key_prefix, &resolved);

        if !request.force_refresh {
            if let Some(report) = self.cache_lookup::<CloseCallReport>(&key).await {
                return Ok(present_close_calls(
                    report,
                    page,
                    page_size,
                    request.include_details,
                ));
            }
        }

        let guard = self.guard();

        let vehicle_classes: Vec<ObjectClass> = match resolved.vehicle_class {
            Some(class) => vec![class],
            None => ObjectClass::VEHICLES.to_vec(),
        };
        let zones: Vec<String> = resolved.zone.clone().into_iter().collect();

        let (events, stats) = self
            .run_matcher(&resolved, &zones, &vehicle_classes, &guard)
            .await?;
        metrics::CLOSE_CALLS_DETECTED_TOTAL.inc_by(events.len() as u64);

        let (by_vehicle_class, by_severity, time_series) = summarize(&events);
        let total_count = events.len() as u64;
        let ttl = self.config.cache.close_call_ttl();

        let full_report = CloseCallReport {
            total_count,
            by_vehicle_class,
            by_severity,
            time_series,
            close_calls: Some(events),
            statistics: stats,
            parameters_used: CloseCallParameters::from_resolved(&resolved),
            computed_at: now_iso(),
            cache_metadata: CacheMetadata {
                cached: true,
                cache_ttl: Some(ttl.as_secs()),
            },
            pagination: Pagination {
                count: total_count,
                page: 1,
                pages: total_pages(total_count, page_size),
                page_size,
            },
        };

        self.cache_store(key, &full_report, ttl).await;

        let mut fresh = full_report;
        fresh.cache_metadata = CacheMetadata::default();
        Ok(present_close_calls(
            fresh,
            page,
            page_size,
            request.include_details,
        ))
    }

    /// Fetch humans and window-expanded vehicles, then run the matcher.
    async fn run_matcher(
        &self,
        resolved: &ResolvedCloseCall,
        zones: &[String],
        vehicle_classes: &[ObjectClass],
        guard: &ExecutionGuard,
    ) -> Result<(Vec<CloseCallEvent>, MatcherStats)> {
        let human_query = StoreQuery {
            from_time: resolved.from_time,
            to_time: resolved.to_time,
            object_classes: vec![ObjectClass::Human],
            zones: zones.to_vec(),
        };
        let mut humans = self.store.query(&human_query).await?;
        humans.sort_by_key(|d| d.timestamp);

        let mut stats = MatcherStats {
            human_detections_processed: humans.len() as u64,
            ..Default::default()
        };
        metrics::DETECTIONS_SCANNED_TOTAL
            .with_label_values(&["close_calls"])
            .inc_by(humans.len() as u64);

        let Some((first, last)) = humans.first().zip(humans.last()) else {
            stats.computation_time_ms = guard.elapsed_ms();
            return Ok((Vec::new(), stats));
        };

        // Widen the vehicle fetch by the pairing window so boundary
        // pairings at either end of the human span survive.
        let window = resolved.time_window_ms;
        let vehicle_query = StoreQuery {
            from_time: Some(first.timestamp - window),
            to_time: Some(last.timestamp + window),
            object_classes: vehicle_classes.to_vec(),
            zones: zones.to_vec(),
        };
        let mut vehicles = self.store.query(&vehicle_query).await?;
        vehicles.sort_by_key(|d| d.timestamp);

        stats.vehicle_detections_processed = vehicles.len() as u64;
        metrics::DETECTIONS_SCANNED_TOTAL
            .with_label_values(&["close_calls"])
            .inc_by(vehicles.len() as u64);

        let events = match_close_calls(
            resolved,
            &humans,
            &vehicles,
            &self.config.close_call.severity,
            guard,
        )?;

        stats.close_calls_detected = events.len() as u64;
        stats.computation_time_ms = guard.elapsed_ms();
        tracing::debug!(
            humans = stats.human_detections_processed,
            vehicles = stats.vehicle_detections_processed,
            close_calls = stats.close_calls_detected,
            elapsed_ms = stats.computation_time_ms,
            "Close-call matching complete"
        );
        Ok((events, stats))
    }

    // ------------------------------------------------------------------
    // Safety violations
    // ------------------------------------------------------------------

    /// Compute (or serve from cache) a vest-violation report.
    pub async fn vest_violations(
        &self,
        request: &VestViolationRequest,
    ) -> Result<VestViolationReport> {
        request.validate(&self.config)?;
        let key = canonical::vest_violation_key(&self.config.cache.key_prefix, request);

        if !request.force_refresh {
            if let Some(report) = self.cache_lookup::<VestViolationReport>(&key).await {
                return Ok(report);
            }
        }

        let guard = self.guard();
        let humans = self
            .store
            .query(&StoreQuery {
                from_time: request.from_time,
                to_time: request.to_time,
                object_classes: vec![ObjectClass::Human],
                zones: request.zone.clone().into_iter().collect(),
            })
            .await?;
        let summary = scan_vest_violations(&humans, &guard)?;

        let ttl = Duration::from_secs(self.config.cache.default_ttl_secs);
        let report = VestViolationReport {
            summary,
            computed_at: now_iso(),
            cache_metadata: CacheMetadata {
                cached: true,
                cache_ttl: Some(ttl.as_secs()),
            },
        };
        self.cache_store(key, &report, ttl).await;

        let mut fresh = report;
        fresh.cache_metadata = CacheMetadata::default();
        Ok(fresh)
    }

    /// Compute (or serve from cache) an overspeed report.
    pub async fn overspeed_events(&self, request: &OverspeedRequest) -> Result<OverspeedReport> {
        request.validate(&self.config)?;
        let key = canonical::overspeed_key(&self.config.cache.key_prefix, request);

        if !request.force_refresh {
            if let Some(report) = self.cache_lookup::<OverspeedReport>(&key).await {
                return Ok(report);
            }
        }

        let mut classes = ObjectClass::VEHICLES.to_vec();
        if request.include_humans {
            classes.push(ObjectClass::Human);
        }

        let guard = self.guard();
        let detections = self
            .store
            .query(&StoreQuery {
                from_time: request.from_time,
                to_time: request.to_time,
                object_classes: classes,
                zones: request.zone.clone().into_iter().collect(),
            })
            .await?;
        let summary = scan_overspeed(
            &detections,
            request.speed_threshold,
            &self.config.overspeed,
            &guard,
        )?;

        let ttl = Duration::from_secs(self.config.cache.default_ttl_secs);
        let report = OverspeedReport {
            summary,
            computed_at: now_iso(),
            cache_metadata: CacheMetadata {
                cached: true,
                cache_ttl: Some(ttl.as_secs()),
            },
        };
        self.cache_store(key, &report, ttl).await;

        let mut fresh = report;
        fresh.cache_metadata = CacheMetadata::default();
        Ok(fresh)
    }

    // ------------------------------------------------------------------
    // Dashboard
    // ------------------------------------------------------------------

    /// Live top-card metrics. Never cached; the dashboard polls this.
    pub async fn dashboard_metrics(&self) -> Result<DashboardMetrics> {
        let detections = self.store.query(&StoreQuery::new()).await?;
        let detection_volume = self.store.count().await?;

        let mut humans: HashSet<&str> = HashSet::new();
        let mut vehicles: HashSet<&str> = HashSet::new();
        let mut vest_known = 0u64;
        let mut vest_on = 0u64;
        for d in &detections {
            if d.object_class == ObjectClass::Human {
                humans.insert(&d.tracking_id);
                if let Some(vest) = d.vest {
                    vest_known += 1;
                    if vest {
                        vest_on += 1;
                    }
                }
            } else {
                vehicles.insert(&d.tracking_id);
            }
        }

        Ok(DashboardMetrics {
            active_humans: humans.len() as u64,
            active_vehicles: vehicles.len() as u64,
            detection_volume,
            vest_compliance: if vest_known > 0 {
                vest_on as f64 / vest_known as f64 * 100.0
            } else {
                0.0
            },
        })
    }

    /// Newest-first rows for the sanity-check table. Never cached.
    pub async fn latest_detections(
        &self,
        request: &LatestDetectionsRequest,
    ) -> Result<LatestDetections> {
        let limit = request.limit.unwrap_or(20).clamp(20, 50) as usize;

        let mut rows = self
            .store
            .query(&StoreQuery {
                from_time: None,
                to_time: None,
                object_classes: request.object_classes.clone(),
                zones: request.zones.clone(),
            })
            .await?;

        if let Some(want) = request.vest {
            rows.retain(|d| d.vest == Some(want));
        }

        rows.sort_by_key(|d| std::cmp::Reverse(d.timestamp));
        rows.truncate(limit);

        Ok(LatestDetections {
            total: rows.len() as u64,
            detections: rows,
        })
    }

    // ------------------------------------------------------------------
    // Cache plumbing
    // ------------------------------------------------------------------

    fn guard(&self) -> ExecutionGuard {
        ExecutionGuard::new(
            Duration::from_millis(self.config.query.default_timeout_ms),
            self.cancel.clone(),
        )
    }

    /// Cache read that can only produce a hit: backend errors and corrupt
    /// payloads degrade to a miss.
    async fn cache_lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry: CacheEntry = match self.cache.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Corrupt cache payload; treating as miss");
                let _ = self.cache.invalidate(key).await;
                None
            }
        }
    }

    async fn cache_store<T: Serialize>(&self, key: CacheKey, value: &T, ttl: Duration) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize result for caching");
                return;
            }
        };
        if let Err(e) = self.cache.put(key, payload, ttl).await {
            tracing::warn!(error = %e, "Cache write failed; result served uncached");
        }
    }
}

fn status_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::InvalidQuery(_)) => "invalid",
        Err(EngineError::Store(_)) => "store_error",
        Err(EngineError::Timeout(_)) => "timeout",
        Err(EngineError::Cancelled) => "cancelled",
    }
}

fn now_iso() -> String {
    time::format_iso_millis(chrono::Utc::now().timestamp_millis())
}

fn total_pages(count: u64, page_size: u32) -> u32 {
    (count.div_ceil(page_size as u64)) as u32
}

/// Slice a full report down to one page and the requested detail level.
fn present_close_calls(
    mut report: CloseCallReport,
    page: u32,
    page_size: u32,
    include_details: bool,
) -> CloseCallReport {
    let events = report.close_calls.take().unwrap_or_default();
    let count = report.total_count;

    report.pagination = Pagination {
        count,
        page,
        pages: total_pages(count, page_size),
        page_size,
    };

    if include_details {
        let start = (page as u64 - 1).saturating_mul(page_size as u64) as usize;
        let page_events: Vec<CloseCallEvent> = events
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        report.close_calls = Some(page_events);
    }

    report
}
