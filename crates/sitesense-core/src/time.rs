//! Time buckets and timestamp formatting.
//!
//! Buckets are fixed-width truncations of a millisecond timestamp (floor
//! division, never calendar-aware), so boundaries are deterministic and
//! timezone-agnostic: `1d` buckets start at UTC midnight, `6h` buckets at
//! 00:00/06:00/12:00/18:00, and so on.

use crate::error::Error;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60_000;

/// Fixed-width time bucket for time-series grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeBucket {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl TimeBucket {
    /// Bucket width in milliseconds.
    pub fn width_ms(self) -> i64 {
        match self {
            TimeBucket::OneMinute => MINUTE_MS,
            TimeBucket::FiveMinutes => 5 * MINUTE_MS,
            TimeBucket::FifteenMinutes => 15 * MINUTE_MS,
            TimeBucket::OneHour => 60 * MINUTE_MS,
            TimeBucket::SixHours => 6 * 60 * MINUTE_MS,
            TimeBucket::OneDay => 24 * 60 * MINUTE_MS,
        }
    }

    /// Bucket width in hours, for per-hour rate metrics.
    pub fn width_hours(self) -> f64 {
        self.width_ms() as f64 / 3_600_000.0
    }

    /// Truncate a millisecond timestamp to this bucket's boundary.
    ///
    /// Floor division, so negative (pre-epoch) timestamps truncate toward
    /// negative infinity rather than toward zero.
    pub fn truncate(self, timestamp_ms: i64) -> i64 {
        let width = self.width_ms();
        timestamp_ms.div_euclid(width) * width
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeBucket::OneMinute => "1m",
            TimeBucket::FiveMinutes => "5m",
            TimeBucket::FifteenMinutes => "15m",
            TimeBucket::OneHour => "1h",
            TimeBucket::SixHours => "6h",
            TimeBucket::OneDay => "1d",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(TimeBucket::OneMinute),
            "5m" => Ok(TimeBucket::FiveMinutes),
            "15m" => Ok(TimeBucket::FifteenMinutes),
            "1h" => Ok(TimeBucket::OneHour),
            "6h" => Ok(TimeBucket::SixHours),
            "1d" => Ok(TimeBucket::OneDay),
            other => Err(Error::UnknownTimeBucket(other.to_string())),
        }
    }
}

/// Render a millisecond timestamp as ISO 8601 UTC with millisecond precision.
pub fn format_iso_millis(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// Render a millisecond timestamp truncated to the minute, `YYYY-MM-DDTHH:MM`.
///
/// This is the key format of close-call and violation time series.
pub fn format_iso_minute(timestamp_ms: i64) -> String {
    let minute = TimeBucket::OneMinute.truncate(timestamp_ms);
    match Utc.timestamp_millis_opt(minute).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M").to_string(),
        None => minute.to_string(),
    }
}

/// Serde adapter: `i64` milliseconds in memory, ISO 8601 UTC on the wire.
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_iso_millis(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        let dt = DateTime::parse_from_rfc3339(&s).map_err(serde::de::Error::custom)?;
        Ok(dt.with_timezone(&Utc).timestamp_millis())
    }
}
