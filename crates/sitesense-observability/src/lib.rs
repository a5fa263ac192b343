//! Sitesense Observability
//!
//! Prometheus metrics for the analytics engine: query throughput and
//! latency, result-cache effectiveness, and close-call detection volume.
//!
//! # Usage
//!
//! ```no_run
//! use sitesense_observability::metrics;
//!
//! // Register all metrics with the global registry (idempotent).
//! metrics::init();
//!
//! metrics::CACHE_HITS_TOTAL.inc();
//! ```

pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};
