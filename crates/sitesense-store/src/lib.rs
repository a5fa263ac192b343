//! Detection Store Adapter
//!
//! This crate defines the boundary between the analytics engine and wherever
//! detection rows actually live. The engine never does its own storage I/O;
//! it asks a [`DetectionStore`] for time-ordered rows matching a coarse
//! predicate set and applies everything finer-grained itself.
//!
//! ## Why a trait?
//!
//! Production deployments back this with a relational table (indexed on
//! `(object_class, timestamp)` and `(zone, timestamp)`); tests and embedded
//! demos use [`MemoryDetectionStore`]. The engine only depends on the
//! contract:
//!
//! - Results are ordered by ascending `timestamp`.
//! - Every returned row satisfies every present predicate of the query.
//! - Backend outages surface as [`StoreError::Unavailable`], never as a
//!   silently empty result set.
//!
//! ## Usage
//!
//! ```ignore
//! use sitesense_store::{DetectionStore, MemoryDetectionStore, StoreQuery};
//!
//! let store = MemoryDetectionStore::new(rows);
//! let humans = store
//!     .query(&StoreQuery::new().with_classes([ObjectClass::Human]))
//!     .await?;
//! ```

pub mod error;
pub mod memory;
pub mod query;

pub use error::{Result, StoreError};
pub use memory::MemoryDetectionStore;
pub use query::StoreQuery;

use async_trait::async_trait;
use sitesense_core::Detection;

/// Read-only query interface over persisted detections.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Fetch all detections matching `query`, ordered by ascending
    /// timestamp.
    ///
    /// Absent predicates impose no constraint; a default query returns the
    /// whole table.
    async fn query(&self, query: &StoreQuery) -> Result<Vec<Detection>>;

    /// Total number of persisted detection rows.
    async fn count(&self) -> Result<u64>;
}
