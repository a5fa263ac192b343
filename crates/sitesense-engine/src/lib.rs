//! Sitesense Analytics Engine
//!
//! The query core behind the safety dashboard: a close-call detection
//! algorithm and a generic aggregation engine over industrial detection
//! data, sharing one canonicalized result cache.
//!
//! ## Architecture
//!
//! ```text
//! request
//!    │
//!    ▼
//! ┌─────────────────┐   resolve + canonicalize
//! │ AnalyticsService│──────────────────────────┐
//! └───────┬─────────┘                          ▼
//!         │ miss                        ┌─────────────┐
//!         │◄───────────────────────────►│ ResultCache │ hit → return
//!         ▼                             └─────────────┘
//! ┌─────────────────┐  time-ordered rows
//! │ DetectionStore  │──────────────┐
//! └─────────────────┘              ▼
//!                    ┌──────────────────────────┐
//!                    │ aggregate / close-call / │
//!                    │ violation scan           │
//!                    └──────────┬───────────────┘
//!                               │ cache put, paginate
//!                               ▼
//!                            response
//! ```
//!
//! Close-call events implement the same [`AggregateRecord`] row shape as
//! raw detections, so `Aggregate(entity = events, ...)` groups and rates
//! near misses with the same engine that counts detections.
//!
//! ## Usage
//!
//! ```ignore
//! use sitesense_engine::{AnalyticsService, AggregationRequest, EngineConfig};
//! use sitesense_store::MemoryDetectionStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryDetectionStore::new(rows));
//! let service = AnalyticsService::with_memory_cache(store, EngineConfig::default());
//!
//! let response = service.aggregate(&AggregationRequest::default()).await?;
//! assert!(!response.meta.cached);
//! ```

pub mod aggregate;
pub mod cache;
pub mod canonical;
pub mod closecall;
pub mod config;
pub mod error;
pub mod facade;
pub mod guard;
pub mod query;
pub mod violations;

pub use aggregate::{AggregateRecord, SeriesRow};
pub use cache::{CacheEntry, CacheError, MemoryResultCache, ResultCache};
pub use canonical::CacheKey;
pub use closecall::{MatcherStats, SeverityBreakdown, TimeSeriesPoint};
pub use config::{
    CacheConfig, CloseCallConfig, EngineConfig, OverspeedConfig, QueryConfig, SeverityBands,
};
pub use error::{EngineError, Result};
pub use facade::{
    AggregateMeta, AggregateResponse, AnalyticsService, CacheMetadata, CloseCallParameters,
    CloseCallReport, DashboardMetrics, LatestDetections, LatestDetectionsRequest, OverspeedReport,
    Pagination, VestViolationReport,
};
pub use query::{
    AggregationRequest, CloseCallRequest, Dimension, Entity, FilterSet, Metric, OverspeedRequest,
    VestViolationRequest,
};
pub use violations::{OverspeedSummary, VestViolationSummary};
