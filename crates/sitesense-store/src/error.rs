//! Store error types

use thiserror::Error;

/// Errors surfaced by a detection store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is down or unreachable. Retryable; the engine
    /// propagates this rather than returning empty results.
    #[error("Detection store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid store query: {0}")]
    InvalidQuery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
