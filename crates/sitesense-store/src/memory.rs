//! In-memory detection store.
//!
//! Reference [`DetectionStore`](crate::DetectionStore) backend holding the
//! whole table as a timestamp-sorted vector. Used by tests, benchmarks and
//! embedded demos; production deployments put a real database behind the
//! same trait.

use crate::error::Result;
use crate::query::StoreQuery;
use crate::DetectionStore;
use async_trait::async_trait;
use sitesense_core::Detection;

/// Detection store backed by a sorted in-memory vector.
pub struct MemoryDetectionStore {
    rows: Vec<Detection>,
}

impl MemoryDetectionStore {
    /// Build a store from arbitrary-order rows. Rows are sorted by
    /// timestamp once, up front.
    pub fn new(mut rows: Vec<Detection>) -> Self {
        rows.sort_by_key(|d| d.timestamp);
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl DetectionStore for MemoryDetectionStore {
    async fn query(&self, query: &StoreQuery) -> Result<Vec<Detection>> {
        // Narrow the scan to the time range first; rows are timestamp-sorted.
        let start = match query.from_time {
            Some(from) => self.rows.partition_point(|d| d.timestamp < from),
            None => 0,
        };
        let end = match query.to_time {
            Some(to) => self.rows.partition_point(|d| d.timestamp <= to),
            None => self.rows.len(),
        };
        if start >= end {
            return Ok(Vec::new());
        }

        let matched: Vec<Detection> = self.rows[start..end]
            .iter()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();

        tracing::debug!(
            scanned = end - start,
            matched = matched.len(),
            "Memory store query"
        );
        Ok(matched)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesense_core::ObjectClass;

    fn det(ts: i64, id: &str, class: ObjectClass) -> Detection {
        Detection {
            timestamp: ts,
            tracking_id: id.to_string(),
            object_class: class,
            x: 0.0,
            y: 0.0,
            zone: None,
            speed: None,
            vest: None,
            heading: None,
        }
    }

    #[tokio::test]
    async fn test_results_are_time_ordered() {
        let store = MemoryDetectionStore::new(vec![
            det(300, "c", ObjectClass::Human),
            det(100, "a", ObjectClass::Human),
            det(200, "b", ObjectClass::Human),
        ]);

        let rows = store.query(&StoreQuery::new()).await.unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|d| d.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn test_time_range_narrowing() {
        let rows: Vec<Detection> = (0..100)
            .map(|i| det(i * 10, "t", ObjectClass::Vehicle))
            .collect();
        let store = MemoryDetectionStore::new(rows);

        let got = store
            .query(&StoreQuery::new().with_time_range(Some(250), Some(500)))
            .await
            .unwrap();
        assert_eq!(got.len(), 26); // 250..=500 inclusive, step 10
        assert_eq!(got.first().unwrap().timestamp, 250);
        assert_eq!(got.last().unwrap().timestamp, 500);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let store = MemoryDetectionStore::new(vec![det(100, "a", ObjectClass::Human)]);
        let got = store
            .query(&StoreQuery::new().with_time_range(Some(200), Some(300)))
            .await
            .unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_count() {
        let store = MemoryDetectionStore::new(vec![
            det(1, "a", ObjectClass::Human),
            det(2, "b", ObjectClass::Agv),
        ]);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
