//! Evaluation scheduler for a single link
//!
//! Handles the two entry points of a link's scheduler:
//! - `record_event`: persist the click, then arm or re-arm the timer
//! - `on_timer_fired`: reload the click and create the evaluation workflow
//!
//! Every handler reads from the store first. A fire can be delivered in a
//! different execution context than the call that armed it, so nothing
//! cached in memory is trusted across calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::SchedulerError;
use crate::model::{ClickEvent, EvaluationParams, FireOutcome, SchedulerState};
use crate::persistence::StateStore;
use crate::timer::{wall_clock, TimerService};
use crate::trigger::WorkflowTrigger;

/// Debounced scheduler for one link id
///
/// Not synchronized internally: callers must run its handlers one at a
/// time, which the per-link actor guarantees.
///
/// # Example
///
/// ```ignore
/// let mut scheduler = EvaluationScheduler::new("link1", store, timers, trigger, window);
/// scheduler.load().await?;
/// scheduler.record_event(click).await?;
/// // ... later, when the timer service reports the fire
/// scheduler.on_timer_fired().await?;
/// ```
pub struct EvaluationScheduler {
    link_id: String,
    store: Arc<dyn StateStore>,
    timers: Arc<dyn TimerService>,
    trigger: Arc<dyn WorkflowTrigger>,
    debounce_window: Duration,
    click_data: Option<ClickEvent>,
    loaded: bool,
}

impl EvaluationScheduler {
    pub fn new(
        link_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        trigger: Arc<dyn WorkflowTrigger>,
        debounce_window: Duration,
    ) -> Self {
        Self {
            link_id: link_id.into(),
            store,
            timers,
            trigger,
            debounce_window,
            click_data: None,
            loaded: false,
        }
    }

    pub fn link_id(&self) -> &str {
        &self.link_id
    }

    /// Whether [`load`](Self::load) has completed successfully
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Latest click as of the last store access
    pub fn cached_click(&self) -> Option<&ClickEvent> {
        self.click_data.as_ref()
    }

    /// Restore the latest click from durable storage
    ///
    /// Must succeed before any other handler runs.
    #[instrument(skip(self), fields(link_id = %self.link_id))]
    pub async fn load(&mut self) -> Result<(), SchedulerError> {
        self.click_data = self.store.get(&self.link_id).await?;
        self.loaded = true;
        debug!(has_click = self.click_data.is_some(), "scheduler state loaded");
        Ok(())
    }

    /// Record a click and (re)arm the link's timer
    ///
    /// The click is durable before this returns. Returns the new deadline,
    /// always `now + debounce_window`, whether the link was idle or armed.
    ///
    /// The store is written before the cached click is replaced, so a
    /// failed write leaves neither a stale cache nor an armed timer.
    pub async fn record_event(&mut self, event: ClickEvent) -> Result<Instant, SchedulerError> {
        info!(
            link_id = %self.link_id,
            destination_url = %event.destination_url,
            "collect link click"
        );

        self.store.put(&self.link_id, &event).await?;
        self.click_data = Some(event);
        info!(link_id = %self.link_id, "click data saved to storage");

        let previous = self.timers.pending(&self.link_id).await?;
        let deadline = Instant::now() + self.debounce_window;
        self.timers.schedule(&self.link_id, deadline).await?;

        match previous {
            None => info!(
                link_id = %self.link_id,
                deadline = %wall_clock(deadline),
                "alarm set"
            ),
            Some(previous) => info!(
                link_id = %self.link_id,
                from = %wall_clock(previous),
                to = %wall_clock(deadline),
                "alarm updated"
            ),
        }

        Ok(deadline)
    }

    /// Dispatch the latest click to the evaluation workflow
    ///
    /// The timer slot has already been consumed by the timer service. A
    /// failed dispatch leaves the stored click untouched, so delivering
    /// the fire again re-dispatches the same payload.
    pub async fn on_timer_fired(&mut self) -> Result<FireOutcome, SchedulerError> {
        info!(link_id = %self.link_id, "evaluation scheduler alarm triggered");

        self.click_data = self.store.get(&self.link_id).await?;

        let Some(click) = self.click_data.as_ref() else {
            error!(link_id = %self.link_id, "click data not found in storage during alarm");
            return Err(SchedulerError::MissingPayload {
                link_id: self.link_id.clone(),
            });
        };

        let params = EvaluationParams::from(click);
        info!(
            link_id = %params.link_id,
            account_id = %params.account_id,
            destination_url = %params.destination_url,
            "creating workflow"
        );

        match self.trigger.create(params.clone()).await {
            Ok(workflow) => {
                info!(link_id = %self.link_id, workflow_id = %workflow.id, "workflow created successfully");
                Ok(FireOutcome {
                    workflow,
                    dispatched: params,
                })
            }
            Err(e) => {
                error!(link_id = %self.link_id, error = %e, "failed to create workflow");
                Err(e.into())
            }
        }
    }

    /// Whether the link's timer is armed
    ///
    /// An unreachable timer service counts as armed.
    pub async fn has_pending_timer(&self) -> bool {
        !matches!(self.timers.pending(&self.link_id).await, Ok(None))
    }

    /// Arm an idle link so its stored click is delivered again after `delay`
    ///
    /// Returns `None` without touching the timer when the link is already
    /// armed: the pending timer dispatches whichever click armed it.
    pub async fn arm_redelivery(
        &mut self,
        delay: Duration,
    ) -> Result<Option<Instant>, SchedulerError> {
        if self.timers.pending(&self.link_id).await?.is_some() {
            return Ok(None);
        }

        let deadline = Instant::now() + delay;
        self.timers.schedule(&self.link_id, deadline).await?;
        info!(
            link_id = %self.link_id,
            deadline = %wall_clock(deadline),
            "alarm set for redelivery"
        );
        Ok(Some(deadline))
    }

    /// Current stored click and pending deadline
    pub async fn state(&mut self) -> Result<SchedulerState, SchedulerError> {
        self.click_data = self.store.get(&self.link_id).await?;
        let timer_deadline = self.timers.pending(&self.link_id).await?;
        Ok(SchedulerState {
            latest_payload: self.click_data.clone(),
            timer_deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SchedulerPhase;
    use crate::persistence::InMemoryStateStore;
    use crate::testing::RecordingWorkflowTrigger;
    use crate::timer::{FiredTimers, TokioTimerService};

    const WINDOW: Duration = Duration::from_secs(24);

    struct Fixture {
        store: Arc<InMemoryStateStore>,
        timers: Arc<TokioTimerService>,
        trigger: Arc<RecordingWorkflowTrigger>,
        _fired: FiredTimers,
    }

    impl Fixture {
        fn new() -> Self {
            let (timers, fired) = TokioTimerService::new();
            Self {
                store: Arc::new(InMemoryStateStore::new()),
                timers: Arc::new(timers),
                trigger: Arc::new(RecordingWorkflowTrigger::new()),
                _fired: fired,
            }
        }

        fn scheduler(&self, link_id: &str) -> EvaluationScheduler {
            EvaluationScheduler::new(
                link_id,
                self.store.clone(),
                self.timers.clone(),
                self.trigger.clone(),
                WINDOW,
            )
        }
    }

    fn click(link_id: &str, url: &str) -> ClickEvent {
        ClickEvent::new("acc1", link_id, url, "US")
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_from_idle_arms_timer() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();

        let start = Instant::now();
        let deadline = scheduler
            .record_event(click("link1", "https://a"))
            .await
            .unwrap();

        assert_eq!(deadline, start + WINDOW);
        let state = scheduler.state().await.unwrap();
        assert_eq!(state.phase(), SchedulerPhase::Armed);
        assert_eq!(state.timer_deadline, Some(start + WINDOW));
        assert_eq!(state.latest_payload, Some(click("link1", "https://a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_while_armed_pushes_deadline() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();
        let start = Instant::now();

        scheduler
            .record_event(click("link1", "https://a"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let deadline = scheduler
            .record_event(click("link1", "https://b"))
            .await
            .unwrap();

        assert_eq!(deadline, start + Duration::from_secs(34));
        assert_eq!(fx.timers.armed_count(), 1);
        assert_eq!(
            fx.store.get("link1").await.unwrap(),
            Some(click("link1", "https://b"))
        );
    }

    #[tokio::test]
    async fn test_failed_write_does_not_arm() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();
        fx.store.fail_writes(true);

        let result = scheduler.record_event(click("link1", "https://a")).await;

        assert!(matches!(result, Err(SchedulerError::StorageFailure(_))));
        assert_eq!(fx.timers.pending("link1").await.unwrap(), None);
        assert!(scheduler.cached_click().is_none());
    }

    #[tokio::test]
    async fn test_fire_dispatches_latest_click_without_country() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();
        scheduler
            .record_event(click("link1", "https://a"))
            .await
            .unwrap();

        let outcome = scheduler.on_timer_fired().await.unwrap();

        assert_eq!(outcome.workflow.id, "wf-1");
        assert_eq!(
            outcome.dispatched,
            EvaluationParams {
                link_id: "link1".to_string(),
                account_id: "acc1".to_string(),
                destination_url: "https://a".to_string(),
            }
        );
        assert_eq!(fx.trigger.calls(), vec![outcome.dispatched]);
    }

    #[tokio::test]
    async fn test_fire_reloads_from_store() {
        let fx = Fixture::new();
        let mut armed_by = fx.scheduler("link1");
        armed_by.load().await.unwrap();
        armed_by
            .record_event(click("link1", "https://a"))
            .await
            .unwrap();

        // Another execution context wrote a newer click.
        fx.store
            .put("link1", &click("link1", "https://newer"))
            .await
            .unwrap();

        let outcome = armed_by.on_timer_fired().await.unwrap();
        assert_eq!(outcome.dispatched.destination_url, "https://newer");
    }

    #[tokio::test]
    async fn test_fire_without_click_is_missing_payload() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();

        let result = scheduler.on_timer_fired().await;

        assert!(matches!(
            result,
            Err(SchedulerError::MissingPayload { ref link_id }) if link_id == "link1"
        ));
        assert_eq!(fx.trigger.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_click_for_redelivery() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();
        scheduler
            .record_event(click("link1", "https://a"))
            .await
            .unwrap();
        fx.trigger.fail_next(1);

        let first = scheduler.on_timer_fired().await;
        assert!(matches!(
            first,
            Err(SchedulerError::DownstreamDispatchFailure(_))
        ));

        let second = scheduler.on_timer_fired().await.unwrap();
        assert_eq!(second.dispatched.destination_url, "https://a");
        assert_eq!(fx.trigger.call_count(), 2);
        assert_eq!(fx.trigger.created_count(), 1);
    }

    #[tokio::test]
    async fn test_load_restores_persisted_click() {
        let fx = Fixture::new();
        fx.store
            .put("link1", &click("link1", "https://a"))
            .await
            .unwrap();

        let mut scheduler = fx.scheduler("link1");
        assert!(!scheduler.is_loaded());
        scheduler.load().await.unwrap();

        assert!(scheduler.is_loaded());
        assert_eq!(scheduler.cached_click(), Some(&click("link1", "https://a")));
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let fx = Fixture::new();
        fx.store.fail_reads(true);
        let mut scheduler = fx.scheduler("link1");

        assert!(matches!(
            scheduler.load().await,
            Err(SchedulerError::StorageFailure(_))
        ));
        assert!(!scheduler.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_is_not_armed_over_pending_timer() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();
        let deadline = scheduler
            .record_event(click("link1", "https://a"))
            .await
            .unwrap();

        let armed = scheduler
            .arm_redelivery(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(armed, None);
        assert_eq!(fx.timers.pending("link1").await.unwrap(), Some(deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_arms_idle_link() {
        let fx = Fixture::new();
        let mut scheduler = fx.scheduler("link1");
        scheduler.load().await.unwrap();
        assert!(!scheduler.has_pending_timer().await);

        let armed = scheduler
            .arm_redelivery(Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(armed, Some(Instant::now() + Duration::from_secs(2)));
        assert!(scheduler.has_pending_timer().await);
    }
}
