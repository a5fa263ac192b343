//! Engine error types.
//!
//! The taxonomy callers dispatch on:
//!
//! - [`EngineError::InvalidQuery`]: a bad or missing parameter. Client
//!   error; never retried internally. The message names the offending
//!   parameter or bound.
//! - [`EngineError::Store`]: the detection store failed. Retryable service
//!   error; never converted into an empty result.
//! - [`EngineError::Timeout`] / [`EngineError::Cancelled`]: the computation
//!   was bounded or abandoned. Distinct from `InvalidQuery` so callers can
//!   retry with narrower filters.
//!
//! Cache failures are deliberately absent: the facade degrades them to
//! cache misses and they never reach the caller.

use sitesense_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Detection store error: {0}")]
    Store(#[from] StoreError),

    #[error("Timeout: query exceeded {0}ms limit")]
    Timeout(u64),

    #[error("Query cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
