//! In-process timers backed by `tokio::time`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::service::{deadline_from_wall_clock, wall_clock, TimerError, TimerService};
use crate::persistence::TimerStore;

/// Receiving end of elapsed timers; yields the link id of each fired slot
pub type FiredTimers = mpsc::UnboundedReceiver<String>;

struct TimerSlot {
    deadline: Instant,
    fire_at: DateTime<Utc>,
    generation: u64,
    handle: AbortHandle,
}

/// Timer service with one sleeping task per armed link
///
/// Each slot carries a generation number. A sleeping task only fires if
/// its slot still has the generation it was spawned with, so a replaced
/// timer can never fire even if it already woke up.
///
/// When built [`with_store`](Self::with_store), every armed slot is also
/// written to the store before `schedule` returns and deleted once it
/// elapses. [`shutdown`](Self::shutdown) leaves persisted rows in place
/// for [`restore`](Self::restore) to pick up.
///
/// # Example
///
/// ```ignore
/// use linkeval_scheduler::TokioTimerService;
///
/// let (timers, mut fired) = TokioTimerService::new();
/// timers.schedule("link1", Instant::now() + Duration::from_secs(24)).await?;
/// assert_eq!(fired.recv().await.as_deref(), Some("link1"));
/// ```
pub struct TokioTimerService {
    slots: Arc<DashMap<String, TimerSlot>>,
    store: Option<Arc<dyn TimerStore>>,
    next_generation: AtomicU64,
    fired_tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl TokioTimerService {
    /// Create a memory-only timer service and the channel its fired timers arrive on
    pub fn new() -> (Self, FiredTimers) {
        Self::build(None)
    }

    /// Create a timer service that persists armed timers to `store`
    pub fn with_store(store: Arc<dyn TimerStore>) -> (Self, FiredTimers) {
        Self::build(Some(store))
    }

    fn build(store: Option<Arc<dyn TimerStore>>) -> (Self, FiredTimers) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let service = Self {
            slots: Arc::new(DashMap::new()),
            store,
            next_generation: AtomicU64::new(0),
            fired_tx,
            closed: AtomicBool::new(false),
        };
        (service, fired_rx)
    }

    /// Number of armed timers
    pub fn armed_count(&self) -> usize {
        self.slots.len()
    }

    /// Re-arm every persisted timer
    ///
    /// Timers whose fire time passed while the process was down fire
    /// immediately. Returns how many timers were restored.
    pub async fn restore(&self) -> Result<usize, TimerError> {
        self.ensure_open()?;
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let persisted = store.load_timers().await?;
        let now = Utc::now();
        let overdue = persisted.iter().filter(|(_, fire_at)| *fire_at <= now).count();

        for (link_id, fire_at) in &persisted {
            self.arm(link_id, deadline_from_wall_clock(*fire_at), *fire_at);
        }

        info!(restored = persisted.len(), overdue, "timers restored");
        Ok(persisted.len())
    }

    /// Disarm every in-memory timer and refuse new ones
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let keys: Vec<String> = self.slots.iter().map(|s| s.key().clone()).collect();
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                slot.handle.abort();
            }
        }
        debug!("timer service shut down");
    }

    fn ensure_open(&self) -> Result<(), TimerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TimerError::Closed)
        } else {
            Ok(())
        }
    }

    fn arm(&self, link_id: &str, deadline: Instant, fire_at: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let key = link_id.to_string();

        // The entry guard is held across the spawn so the new task cannot
        // observe the map before its own slot is in place.
        let entry = self.slots.entry(key.clone());

        let slots = Arc::clone(&self.slots);
        let store = self.store.clone();
        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let consumed = slots
                .remove_if(&key, |_, slot| slot.generation == generation)
                .is_some();
            if !consumed {
                return;
            }

            if let Some(store) = store {
                if let Err(e) = store.delete_timer(&key, fire_at).await {
                    warn!(link_id = %key, error = %e, "failed to delete elapsed timer");
                }
            }

            trace!(link_id = %key, generation, "timer elapsed");
            if fired_tx.send(key).is_err() {
                warn!("fired timer dropped: receiver is gone");
            }
        })
        .abort_handle();

        let slot = TimerSlot {
            deadline,
            fire_at,
            generation,
            handle,
        };
        let replaced = match entry {
            Entry::Occupied(mut occupied) => Some(occupied.insert(slot)),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                None
            }
        };

        if let Some(previous) = replaced {
            previous.handle.abort();
        }
    }
}

#[async_trait]
impl TimerService for TokioTimerService {
    async fn pending(&self, link_id: &str) -> Result<Option<Instant>, TimerError> {
        self.ensure_open()?;
        Ok(self.slots.get(link_id).map(|slot| slot.deadline))
    }

    async fn schedule(&self, link_id: &str, deadline: Instant) -> Result<(), TimerError> {
        self.ensure_open()?;

        let fire_at = wall_clock(deadline);
        if let Some(store) = &self.store {
            store.save_timer(link_id, fire_at).await?;
        }

        self.arm(link_id, deadline, fire_at);
        Ok(())
    }

    async fn cancel(&self, link_id: &str) -> Result<bool, TimerError> {
        self.ensure_open()?;
        let Some((_, slot)) = self.slots.remove(link_id) else {
            return Ok(false);
        };
        slot.handle.abort();

        if let Some(store) = &self.store {
            store.delete_timer(link_id, slot.fire_at).await?;
        }
        Ok(true)
    }
}

impl Drop for TokioTimerService {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            slot.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::persistence::InMemoryStateStore;

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_deadline_and_consumes_slot() {
        let (timers, mut fired) = TokioTimerService::new();
        let deadline = Instant::now() + Duration::from_secs(24);

        timers.schedule("link1", deadline).await.unwrap();
        assert_eq!(timers.pending("link1").await.unwrap(), Some(deadline));

        tokio::time::advance(Duration::from_secs(23)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(fired.recv().await.as_deref(), Some("link1"));
        assert_eq!(timers.pending("link1").await.unwrap(), None);
        assert_eq!(timers.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_slot() {
        let (timers, mut fired) = TokioTimerService::new();
        let start = Instant::now();

        timers
            .schedule("link1", start + Duration::from_secs(24))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        timers
            .schedule("link1", start + Duration::from_secs(34))
            .await
            .unwrap();
        assert_eq!(timers.armed_count(), 1);

        tokio::time::advance(Duration::from_secs(14)).await;
        tokio::task::yield_now().await;
        assert!(fired.try_recv().is_err(), "replaced timer must not fire");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(fired.recv().await.as_deref(), Some("link1"));
        assert!(fired.try_recv().is_err(), "only one fire per slot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let (timers, mut fired) = TokioTimerService::new();

        timers
            .schedule("link1", Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        assert!(timers.cancel("link1").await.unwrap());
        assert!(!timers.cancel("link1").await.unwrap());

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_are_independent_per_link() {
        let (timers, mut fired) = TokioTimerService::new();
        let start = Instant::now();

        timers
            .schedule("link-a", start + Duration::from_secs(5))
            .await
            .unwrap();
        timers
            .schedule("link-b", start + Duration::from_secs(50))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(fired.recv().await.as_deref(), Some("link-a"));
        assert!(timers.pending("link-b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_timers() {
        let (timers, _fired) = TokioTimerService::new();
        timers
            .schedule("link1", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();

        timers.shutdown();

        assert_eq!(timers.armed_count(), 0);
        assert_eq!(
            timers.schedule("link1", Instant::now()).await,
            Err(TimerError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_timer_lives_until_it_elapses() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, mut fired) = TokioTimerService::with_store(store.clone());

        timers
            .schedule("link1", Instant::now() + Duration::from_secs(24))
            .await
            .unwrap();
        assert!(store.timer("link1").is_some());

        tokio::time::advance(Duration::from_secs(24)).await;
        assert_eq!(fired.recv().await.as_deref(), Some("link1"));
        assert_eq!(store.timer("link1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_rearms_persisted_timers_after_restart() {
        let store = Arc::new(InMemoryStateStore::new());
        {
            let (timers, _fired) = TokioTimerService::with_store(store.clone());
            timers
                .schedule("link1", Instant::now() + Duration::from_secs(24))
                .await
                .unwrap();
            timers.shutdown();
        }
        assert!(store.timer("link1").is_some(), "shutdown keeps the row");

        let (timers, mut fired) = TokioTimerService::with_store(store.clone());
        assert_eq!(timers.restore().await.unwrap(), 1);
        assert!(timers.pending("link1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert!(fired.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(fired.recv().await.as_deref(), Some("link1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_fires_overdue_timers_immediately() {
        let store = Arc::new(InMemoryStateStore::new());
        store
            .save_timer("link1", Utc::now() - chrono::Duration::seconds(60))
            .await
            .unwrap();

        let (timers, mut fired) = TokioTimerService::with_store(store.clone());
        timers.restore().await.unwrap();

        assert_eq!(fired.recv().await.as_deref(), Some("link1"));
        assert_eq!(store.timer("link1"), None);
    }

    #[tokio::test]
    async fn test_schedule_fails_when_persist_fails() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, _fired) = TokioTimerService::with_store(store.clone());
        store.fail_writes(true);

        let result = timers
            .schedule("link1", Instant::now() + Duration::from_secs(24))
            .await;

        assert!(matches!(result, Err(TimerError::Storage(_))));
        assert_eq!(timers.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_deletes_persisted_row() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, _fired) = TokioTimerService::with_store(store.clone());

        timers
            .schedule("link1", Instant::now() + Duration::from_secs(24))
            .await
            .unwrap();
        assert!(timers.cancel("link1").await.unwrap());

        assert_eq!(store.timer("link1"), None);
    }
}
