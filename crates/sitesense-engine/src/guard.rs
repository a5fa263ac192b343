//! Execution budget for a single query.
//!
//! The sliding-window join and the aggregation scan both cost time
//! proportional to the filtered set, which pathological filters can make
//! large. Every computation therefore runs under an [`ExecutionGuard`]
//! checked at loop boundaries: past the deadline it fails with `Timeout`,
//! after cancellation with `Cancelled`. A failed computation never reaches
//! the cache.

use crate::error::{EngineError, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Interval, in loop iterations, at which hot loops are expected to call
/// [`ExecutionGuard::check`].
pub const CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    start: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ExecutionGuard {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            start: Instant::now(),
            timeout,
            cancel,
        }
    }

    /// Fail if the budget is spent or the token was cancelled.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.start.elapsed() > self.timeout {
            return Err(EngineError::Timeout(self.timeout.as_millis() as u64));
        }
        Ok(())
    }

    /// Milliseconds spent so far.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
