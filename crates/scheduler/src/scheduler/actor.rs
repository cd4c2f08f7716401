//! Mailbox actor serializing one link's handlers
//!
//! Each link gets one task that owns its [`EvaluationScheduler`] and drains
//! a bounded inbox one command at a time. Different links run on different
//! tasks and never share a lock.
//!
//! An actor whose link has no pending timer stops after an idle period.
//! Before stopping it closes its inbox, serves whatever was already queued
//! and removes its own registry entry. A replacement spawned while it
//! drains waits for it to finish, so a link never has two actors serving
//! at once.

use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{EvaluationScheduler, SchedulerError};
use crate::model::{ClickEvent, FireOutcome, SchedulerState};
use crate::reliability::RetryPolicy;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

/// Live actors keyed by link id
pub(crate) type Registry = DashMap<String, InstanceHandle>;

pub(crate) enum Command {
    RecordEvent {
        event: ClickEvent,
        reply: Reply<Instant>,
    },
    TimerFired {
        reply: Reply<FireOutcome>,
    },
    Snapshot {
        reply: Reply<SchedulerState>,
    },
}

impl Command {
    fn fail(self, err: SchedulerError) {
        // A dropped receiver means the caller gave up waiting.
        match self {
            Self::RecordEvent { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::TimerFired { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::Snapshot { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Everything an actor needs besides its scheduler
pub(crate) struct ActorContext {
    /// Unique across all actors of one host
    pub id: u64,
    pub inbox_capacity: usize,
    pub idle_timeout: Duration,
    pub redelivery: RetryPolicy,
    pub registry: Weak<Registry>,
    /// Stop signal of the actor this one replaces
    pub previous: Option<watch::Receiver<bool>>,
}

/// Sending side of a link's actor
#[derive(Clone)]
pub struct InstanceHandle {
    link_id: String,
    id: u64,
    tx: mpsc::Sender<Command>,
    stopped: watch::Receiver<bool>,
}

impl InstanceHandle {
    /// Spawn the actor for `scheduler` on the current runtime
    pub(crate) fn spawn(scheduler: EvaluationScheduler, ctx: ActorContext) -> Self {
        let link_id = scheduler.link_id().to_string();
        let (tx, inbox) = mpsc::channel(ctx.inbox_capacity.max(1));
        let (stopped_tx, stopped) = watch::channel(false);
        let id = ctx.id;

        let actor = Actor {
            scheduler,
            inbox,
            id,
            idle_timeout: ctx.idle_timeout,
            redelivery: ctx.redelivery,
            failed_fires: 0,
            registry: ctx.registry,
        };
        tokio::spawn(actor.run(ctx.previous, stopped_tx));

        Self {
            link_id,
            id,
            tx,
            stopped,
        }
    }

    pub fn link_id(&self) -> &str {
        &self.link_id
    }

    /// Whether the actor has stopped taking commands
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Receiver that turns true once the actor task has finished
    pub(crate) fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped.clone()
    }

    /// Queue a command, handing it back if the actor has stopped
    pub(crate) async fn send(&self, command: Command) -> Result<(), Command> {
        self.tx.send(command).await.map_err(|returned| returned.0)
    }

    pub async fn record_event(&self, event: ClickEvent) -> Result<Instant, SchedulerError> {
        self.call(|reply| Command::RecordEvent { event, reply }).await
    }

    pub async fn timer_fired(&self) -> Result<FireOutcome, SchedulerError> {
        self.call(|reply| Command::TimerFired { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SchedulerState, SchedulerError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    fn unavailable(&self) -> SchedulerError {
        SchedulerError::InstanceUnavailable {
            link_id: self.link_id.clone(),
        }
    }
}

struct Actor {
    scheduler: EvaluationScheduler,
    inbox: mpsc::Receiver<Command>,
    id: u64,
    idle_timeout: Duration,
    redelivery: RetryPolicy,
    /// Failed deliveries of the current fire
    failed_fires: u32,
    registry: Weak<Registry>,
}

impl Actor {
    async fn run(
        mut self,
        previous: Option<watch::Receiver<bool>>,
        stopped: watch::Sender<bool>,
    ) {
        if let Some(mut previous) = previous {
            // Err means the previous actor is gone without signalling.
            let _ = previous.wait_for(|done| *done).await;
        }

        // Load before the first command is taken off the inbox.
        if let Err(e) = self.scheduler.load().await {
            warn!(link_id = %self.scheduler.link_id(), error = %e, "initial state load failed");
        }

        loop {
            match tokio::time::timeout(self.idle_timeout, self.inbox.recv()).await {
                Ok(Some(command)) => self.handle(command).await,
                Ok(None) => break,
                Err(_) => {
                    if self.scheduler.has_pending_timer().await {
                        continue;
                    }
                    debug!(link_id = %self.scheduler.link_id(), "scheduler actor idle, stopping");
                    self.inbox.close();
                    while let Some(command) = self.inbox.recv().await {
                        self.handle(command).await;
                    }
                    break;
                }
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if(self.scheduler.link_id(), |_, handle| handle.id() == self.id);
        }
        let _ = stopped.send(true);
        debug!(link_id = %self.scheduler.link_id(), "scheduler actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        if !self.scheduler.is_loaded() {
            if let Err(e) = self.scheduler.load().await {
                warn!(link_id = %self.scheduler.link_id(), error = %e, "state load failed, rejecting call");
                command.fail(e);
                return;
            }
        }

        match command {
            Command::RecordEvent { event, reply } => {
                let result = self.scheduler.record_event(event).await;
                if result.is_ok() {
                    self.failed_fires = 0;
                }
                let _ = reply.send(result);
            }
            Command::TimerFired { reply } => {
                let result = self.scheduler.on_timer_fired().await;
                match &result {
                    Ok(_) => self.failed_fires = 0,
                    Err(err) => self.arm_redelivery(err).await,
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.scheduler.state().await);
            }
        }
    }

    /// Re-arm the link's timer after a failed fire, per the redelivery policy
    ///
    /// The redelivery occupies the link's single timer slot, so any click
    /// recorded before it elapses replaces it and is dispatched once by its
    /// own timer.
    async fn arm_redelivery(&mut self, err: &SchedulerError) {
        let link_id = self.scheduler.link_id().to_string();
        let attempt = self.failed_fires + 1;

        if !err.is_retryable() {
            self.failed_fires = 0;
            return;
        }
        if !self.redelivery.has_attempts_remaining(attempt) {
            error!(%link_id, attempt, error = %err, "fire failed, not redelivering");
            self.failed_fires = 0;
            return;
        }

        let delay = self.redelivery.delay_for_attempt(attempt + 1);
        match self.scheduler.arm_redelivery(delay).await {
            Ok(Some(_)) => {
                self.failed_fires = attempt;
                warn!(
                    %link_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "fire failed, redelivery armed"
                );
            }
            Ok(None) => {
                self.failed_fires = 0;
                info!(%link_id, "link re-armed, dropping redelivery");
            }
            Err(arm_err) => {
                self.failed_fires = 0;
                error!(%link_id, error = %arm_err, "could not arm redelivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::persistence::{InMemoryStateStore, StateStore};
    use crate::testing::RecordingWorkflowTrigger;
    use crate::timer::{TimerService, TokioTimerService};

    fn context(registry: &Arc<Registry>, redelivery: RetryPolicy) -> ActorContext {
        ActorContext {
            id: 1,
            inbox_capacity: 4,
            idle_timeout: Duration::from_secs(60),
            redelivery,
            registry: Arc::downgrade(registry),
            previous: None,
        }
    }

    #[tokio::test]
    async fn test_calls_wait_for_successful_load() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, _fired) = TokioTimerService::new();
        let trigger = Arc::new(RecordingWorkflowTrigger::new());
        let registry = Arc::new(Registry::new());
        store.fail_reads(true);

        let scheduler = EvaluationScheduler::new(
            "link1",
            store.clone(),
            Arc::new(timers),
            trigger,
            Duration::from_secs(24),
        );
        let handle = InstanceHandle::spawn(scheduler, context(&registry, RetryPolicy::no_retry()));

        let event = ClickEvent::new("acc1", "link1", "https://a", "US");
        let rejected = handle.record_event(event.clone()).await;
        assert!(matches!(rejected, Err(SchedulerError::StorageFailure(_))));
        assert_eq!(store.write_count(), 0);

        store.fail_reads(false);
        handle.record_event(event.clone()).await.unwrap();
        assert_eq!(store.get("link1").await.unwrap(), Some(event));
    }

    #[tokio::test]
    async fn test_calls_are_served_in_order() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, _fired) = TokioTimerService::new();
        let trigger = Arc::new(RecordingWorkflowTrigger::new());
        let registry = Arc::new(Registry::new());
        let scheduler = EvaluationScheduler::new(
            "link1",
            store,
            Arc::new(timers),
            trigger.clone(),
            Duration::from_secs(24),
        );
        let handle = InstanceHandle::spawn(scheduler, context(&registry, RetryPolicy::no_retry()));

        let first = handle.record_event(ClickEvent::new("acc1", "link1", "https://a", "US"));
        let second = handle.record_event(ClickEvent::new("acc1", "link1", "https://b", "US"));
        let (first, second) = tokio::join!(first, second);
        first.unwrap();
        second.unwrap();

        let outcome = handle.timer_fired().await.unwrap();
        assert_eq!(outcome.dispatched.destination_url, "https://b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fire_occupies_timer_slot() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, _fired) = TokioTimerService::new();
        let timers = Arc::new(timers);
        let trigger = Arc::new(RecordingWorkflowTrigger::new());
        let registry = Arc::new(Registry::new());
        store
            .put("link1", &ClickEvent::new("acc1", "link1", "https://a", "US"))
            .await
            .unwrap();
        trigger.fail_next(1);

        let scheduler = EvaluationScheduler::new(
            "link1",
            store,
            timers.clone(),
            trigger,
            Duration::from_secs(24),
        );
        let policy = RetryPolicy::fixed(Duration::from_secs(5), 3);
        let handle = InstanceHandle::spawn(scheduler, context(&registry, policy));

        let start = Instant::now();
        assert!(handle.timer_fired().await.is_err());
        assert_eq!(
            timers.pending("link1").await.unwrap(),
            Some(start + Duration::from_secs(5))
        );

        // A click replaces the redelivery with a full window.
        let deadline = handle
            .record_event(ClickEvent::new("acc1", "link1", "https://b", "US"))
            .await
            .unwrap();
        assert_eq!(deadline, start + Duration::from_secs(24));
        assert_eq!(timers.pending("link1").await.unwrap(), Some(deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_actor_stops_and_leaves_registry() {
        let store = Arc::new(InMemoryStateStore::new());
        let (timers, _fired) = TokioTimerService::new();
        let trigger = Arc::new(RecordingWorkflowTrigger::new());
        let registry = Arc::new(Registry::new());

        let scheduler = EvaluationScheduler::new(
            "link1",
            store,
            Arc::new(timers),
            trigger,
            Duration::from_secs(24),
        );
        let handle = InstanceHandle::spawn(scheduler, context(&registry, RetryPolicy::no_retry()));
        registry.insert("link1".to_string(), handle.clone());

        let mut stopped = handle.stopped();
        stopped.wait_for(|done| *done).await.unwrap();

        assert!(handle.is_closed());
        assert!(registry.is_empty());
    }
}
