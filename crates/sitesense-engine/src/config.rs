//! Engine Configuration
//!
//! Tunables for the query facade, result cache, close-call matcher and
//! overspeed scan. All structs deserialize with per-field defaults, so an
//! embedder can override just the knobs it cares about:
//!
//! ```ignore
//! use sitesense_engine::EngineConfig;
//!
//! let config = EngineConfig {
//!     query: QueryConfig {
//!         default_timeout_ms: 5_000,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use sitesense_core::{ObjectClass, Severity, TimeBucket};
use std::collections::HashMap;
use std::time::Duration;

/// Result cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached query results (default: 1024).
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// TTL for aggregation results whose bucket has no explicit entry
    /// (default: 300s).
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Per-bucket TTL overrides. Fine buckets feed near-real-time charts
    /// and expire fast; coarse buckets change slowly and can live longer.
    #[serde(default = "default_bucket_ttl_secs")]
    pub bucket_ttl_secs: HashMap<TimeBucket, u64>,

    /// TTL for close-call reports (default: 120s).
    #[serde(default = "default_close_call_ttl_secs")]
    pub close_call_ttl_secs: u64,

    /// Prefix baked into every canonical cache key (default: "sitesense").
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl CacheConfig {
    /// TTL for an aggregation result computed at the given bucket.
    pub fn ttl_for_bucket(&self, bucket: TimeBucket) -> Duration {
        let secs = self
            .bucket_ttl_secs
            .get(&bucket)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn close_call_ttl(&self) -> Duration {
        Duration::from_secs(self.close_call_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            default_ttl_secs: default_cache_ttl_secs(),
            bucket_ttl_secs: default_bucket_ttl_secs(),
            close_call_ttl_secs: default_close_call_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Query execution limits and pagination defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Wall-clock budget per query (default: 30s).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Page size when the request gives none (default: 10).
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Hard page size ceiling (default: 100).
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Maximum allowed `from_time..to_time` span in days (default: 365).
    #[serde(default = "default_max_time_range_days")]
    pub max_time_range_days: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_time_range_days: default_max_time_range_days(),
        }
    }
}

/// Distance-relative severity breakpoints.
///
/// Both fractions are relative to the query's `distance_threshold` D:
/// distances up to and including `high_fraction * D` classify HIGH, below
/// `medium_fraction * D` MEDIUM, everything else LOW. The HIGH boundary is
/// inclusive, matching the inclusive distance check that admits a pair in
/// the first place. Keeping the cut points fractional means severity
/// always derives from the same threshold that admitted the event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityBands {
    #[serde(default = "default_high_fraction")]
    pub high_fraction: f64,

    #[serde(default = "default_medium_fraction")]
    pub medium_fraction: f64,
}

impl SeverityBands {
    /// Classify an admitted distance against the threshold it was admitted
    /// under. Monotonic: smaller distance never yields lower severity.
    pub fn classify(&self, distance: f64, distance_threshold: f64) -> Severity {
        if distance <= distance_threshold * self.high_fraction {
            Severity::High
        } else if distance < distance_threshold * self.medium_fraction {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            high_fraction: default_high_fraction(),
            medium_fraction: default_medium_fraction(),
        }
    }
}

/// Close-call matcher defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseCallConfig {
    /// Pairing distance threshold in meters when the request gives none
    /// (default: 2.0).
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    /// Pairing time window in milliseconds when the request gives none
    /// (default: 250).
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: i64,

    #[serde(default)]
    pub severity: SeverityBands,
}

impl Default for CloseCallConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            time_window_ms: default_time_window_ms(),
            severity: SeverityBands::default(),
        }
    }
}

/// Per-class overspeed thresholds in m/s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverspeedConfig {
    #[serde(default = "default_overspeed_human")]
    pub human: f64,
    #[serde(default = "default_overspeed_vehicle")]
    pub vehicle: f64,
    #[serde(default = "default_overspeed_pallet_truck")]
    pub pallet_truck: f64,
    #[serde(default = "default_overspeed_agv")]
    pub agv: f64,
}

impl OverspeedConfig {
    pub fn threshold_for(&self, class: ObjectClass) -> f64 {
        match class {
            ObjectClass::Human => self.human,
            ObjectClass::Vehicle => self.vehicle,
            ObjectClass::PalletTruck => self.pallet_truck,
            ObjectClass::Agv => self.agv,
        }
    }
}

impl Default for OverspeedConfig {
    fn default() -> Self {
        Self {
            human: default_overspeed_human(),
            vehicle: default_overspeed_vehicle(),
            pallet_truck: default_overspeed_pallet_truck(),
            agv: default_overspeed_agv(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub close_call: CloseCallConfig,
    #[serde(default)]
    pub overspeed: OverspeedConfig,
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_bucket_ttl_secs() -> HashMap<TimeBucket, u64> {
    HashMap::from([
        (TimeBucket::OneMinute, 30),
        (TimeBucket::FiveMinutes, 60),
        (TimeBucket::FifteenMinutes, 120),
        (TimeBucket::OneHour, 300),
        (TimeBucket::SixHours, 900),
        (TimeBucket::OneDay, 3600),
    ])
}

fn default_close_call_ttl_secs() -> u64 {
    120
}

fn default_key_prefix() -> String {
    "sitesense".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    100
}

fn default_max_time_range_days() -> i64 {
    365
}

fn default_high_fraction() -> f64 {
    0.5
}

fn default_medium_fraction() -> f64 {
    0.8
}

fn default_overspeed_human() -> f64 {
    2.0
}

fn default_overspeed_vehicle() -> f64 {
    5.0
}

fn default_overspeed_pallet_truck() -> f64 {
    3.0
}

fn default_overspeed_agv() -> f64 {
    4.0
}

fn default_distance_threshold() -> f64 {
    2.0
}

fn default_time_window_ms() -> i64 {
    250
}
