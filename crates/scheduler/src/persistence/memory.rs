//! In-memory implementation of StateStore and TimerStore for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::store::*;
use crate::model::ClickEvent;

/// In-memory implementation of StateStore and TimerStore
///
/// Used by tests and when no database is configured. Records are kept as
/// serialized JSON so reads go through the same decode path as PostgreSQL.
///
/// # Example
///
/// ```
/// use linkeval_scheduler::InMemoryStateStore;
///
/// let store = InMemoryStateStore::new();
/// assert_eq!(store.len(), 0);
/// ```
pub struct InMemoryStateStore {
    records: RwLock<HashMap<String, serde_json::Value>>,
    timers: RwLock<HashMap<String, DateTime<Utc>>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryStateStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            timers: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of links with a stored click
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Persisted fire time of a link's timer
    pub fn timer(&self, link_id: &str) -> Option<DateTime<Utc>> {
        self.timers.read().get(link_id).copied()
    }

    /// Total successful click writes since creation
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent `get` fail (for testing)
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `put` fail (for testing)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Drop a link's record, simulating external data loss (for testing)
    pub fn remove(&self, link_id: &str) {
        self.records.write().remove(link_id);
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, link_id: &str) -> Result<Option<ClickEvent>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected read failure".to_string()));
        }

        let records = self.records.read();
        match records.get(link_id) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, link_id: &str, event: &ClickEvent) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".to_string()));
        }

        let value = serde_json::to_value(event)?;
        self.records.write().insert(link_id.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TimerStore for InMemoryStateStore {
    async fn save_timer(&self, link_id: &str, fire_at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".to_string()));
        }
        self.timers.write().insert(link_id.to_string(), fire_at);
        Ok(())
    }

    async fn delete_timer(
        &self,
        link_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut timers = self.timers.write();
        if timers.get(link_id) == Some(&fire_at) {
            timers.remove(link_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn load_timers(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected read failure".to_string()));
        }
        Ok(self
            .timers
            .read()
            .iter()
            .map(|(link_id, fire_at)| (link_id.clone(), *fire_at))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryStateStore::new();

        assert_eq!(store.get("link1").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_click() {
        let store = InMemoryStateStore::new();
        let first = ClickEvent::new("acc1", "link1", "https://a", "US");
        let second = ClickEvent::new("acc1", "link1", "https://b", "DE");

        store.put("link1", &first).await.unwrap();
        store.put("link1", &second).await.unwrap();

        assert_eq!(store.get("link1").await.unwrap(), Some(second));
        assert_eq!(store.len(), 1);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_records_are_isolated_per_link() {
        let store = InMemoryStateStore::new();
        let a = ClickEvent::new("acc1", "link-a", "https://a", "US");

        store.put("link-a", &a).await.unwrap();

        assert_eq!(store.get("link-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryStateStore::new();
        let event = ClickEvent::new("acc1", "link1", "https://a", "US");

        store.fail_writes(true);
        assert!(matches!(
            store.put("link1", &event).await,
            Err(StoreError::Database(_))
        ));
        assert_eq!(store.write_count(), 0);

        store.fail_writes(false);
        store.put("link1", &event).await.unwrap();

        store.fail_reads(true);
        assert!(store.get("link1").await.is_err());
    }

    #[tokio::test]
    async fn test_timer_delete_only_matches_current_fire_time() {
        let store = InMemoryStateStore::new();
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(10);

        store.save_timer("link1", first).await.unwrap();
        store.save_timer("link1", second).await.unwrap();

        assert!(!store.delete_timer("link1", first).await.unwrap());
        assert_eq!(store.timer("link1"), Some(second));

        assert!(store.delete_timer("link1", second).await.unwrap());
        assert!(store.load_timers().await.unwrap().is_empty());
    }
}
