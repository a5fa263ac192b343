//! Core error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown object class: {0}")]
    UnknownObjectClass(String),

    #[error("Unknown time bucket: {0} (expected 1m, 5m, 15m, 1h, 6h or 1d)")]
    UnknownTimeBucket(String),

    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
