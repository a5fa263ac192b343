use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Query Metrics
    // ============================================================================

    /// Total queries served, by query kind and outcome
    pub static ref QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sitesense_queries_total", "Total analytics queries served"),
        &["kind", "status"]
    ).expect("metric can be created");

    /// Query latency by kind
    pub static ref QUERY_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("sitesense_query_latency_seconds", "Query latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["kind"]
    ).expect("metric can be created");

    /// Detections scanned by the engine, by query kind
    pub static ref DETECTIONS_SCANNED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sitesense_detections_scanned_total", "Detection rows scanned"),
        &["kind"]
    ).expect("metric can be created");

    /// Close-call events detected
    pub static ref CLOSE_CALLS_DETECTED_TOTAL: IntCounter = IntCounter::new(
        "sitesense_close_calls_detected_total", "Close-call events detected"
    ).expect("metric can be created");

    // ============================================================================
    // Result Cache Metrics
    // ============================================================================

    /// Result cache hits
    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "sitesense_cache_hits_total", "Result cache hits"
    ).expect("metric can be created");

    /// Result cache misses (includes expired entries)
    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "sitesense_cache_misses_total", "Result cache misses"
    ).expect("metric can be created");

    /// Live entries in the result cache
    pub static ref CACHE_ENTRIES: IntGauge = IntGauge::new(
        "sitesense_cache_entries", "Live result cache entries"
    ).expect("metric can be created");
}

/// Register all metrics with the global registry. Safe to call more than
/// once; registration only happens on the first call.
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(QUERIES_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(QUERY_LATENCY.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(DETECTIONS_SCANNED_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CLOSE_CALLS_DETECTED_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CACHE_ENTRIES.clone()))
            .expect("collector can be registered");

        tracing::debug!("Prometheus metrics registered");
    });
}
