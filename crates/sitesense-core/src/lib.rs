//! Core domain types for sitesense.
//!
//! This crate defines the data model shared by every other sitesense crate:
//!
//! - [`Detection`]: one row of the materialized detection table (a tracked
//!   object observed at an instant), produced by ingestion and read-only to
//!   the analytics engine.
//! - [`CloseCallEvent`]: a derived human/vehicle near-miss event. Never
//!   persisted; computed on demand by the close-call matcher.
//! - [`TimeBucket`]: fixed-width timestamp truncation used for time-series
//!   grouping.
//! - [`Severity`]: three-level risk classification of a close call.
//!
//! Timestamps are `i64` milliseconds since the Unix epoch (UTC) throughout;
//! ISO 8601 strings only appear at the serialization boundary.

pub mod detection;
pub mod error;
pub mod event;
pub mod time;

pub use detection::{Detection, ObjectClass};
pub use error::{Error, Result};
pub use event::{CloseCallEvent, Severity};
pub use time::TimeBucket;
