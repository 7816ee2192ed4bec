use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::ReadingStore;
use crate::aqi::EnrichedReading;
use crate::reading::CanonicalReading;

/// Rows kept by [`MemoryStore::new`].
pub const DEFAULT_MEMORY_ROWS: usize = 10_000;

/// Keeps the most recent readings in process memory; the oldest row is
/// evicted once the capacity is reached.
pub struct MemoryStore {
    rows: Mutex<VecDeque<EnrichedReading>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_ROWS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("memory store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: &EnrichedReading) -> Result<()> {
        let mut rows = self.rows.lock().expect("memory store lock poisoned");
        if rows.len() >= self.capacity {
            rows.pop_front();
        }
        rows.push_back(reading.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<CanonicalReading>> {
        let rows = self.rows.lock().expect("memory store lock poisoned");
        // max_by_key returns the last maximum; iterate in reverse so the
        // earliest-appended row wins a tie.
        Ok(rows
            .iter()
            .rev()
            .max_by_key(|r| r.reading.timestamp)
            .map(|r| r.reading.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Pollutant, Pollutants};
    use chrono::{TimeZone, Utc};

    fn enriched(secs: i64, pm10: f64) -> EnrichedReading {
        EnrichedReading::from_reading(CanonicalReading::new(
            Utc.timestamp_opt(secs, 0).unwrap(),
            Pollutants::default().with(Pollutant::Pm10, pm10),
        ))
    }

    #[tokio::test]
    async fn test_empty_store_has_no_latest() {
        let store = MemoryStore::new();
        assert!(store.latest().await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_latest_is_by_timestamp_not_insertion() {
        let store = MemoryStore::new();
        store.append(&enriched(20, 2.0)).await.unwrap();
        store.append(&enriched(10, 1.0)).await.unwrap();
        assert_eq!(store.latest().await.unwrap().unwrap().pollutants.pm10, 2.0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_oldest_rows_evicted_at_capacity() {
        let store = MemoryStore::with_capacity(2);
        store.append(&enriched(30, 3.0)).await.unwrap();
        store.append(&enriched(10, 1.0)).await.unwrap();
        store.append(&enriched(20, 2.0)).await.unwrap();

        assert_eq!(store.len(), 2);
        // The newest reading was evicted first because it was appended first.
        assert_eq!(store.latest().await.unwrap().unwrap().pollutants.pm10, 2.0);
    }
}
