//! Scheduler host: key routing and timer delivery
//!
//! The host owns one actor per active link id, created lazily on first use
//! and stopped once the link has been idle for a while. It turns elapsed
//! timers into `TimerFired` deliveries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use super::actor::{ActorContext, Command, Registry, Reply};
use super::{EvaluationScheduler, InstanceHandle, SchedulerError};
use crate::config::SchedulerConfig;
use crate::model::{ClickEvent, FireOutcome, SchedulerState};
use crate::persistence::StateStore;
use crate::timer::{FiredTimers, TimerService};
use crate::trigger::WorkflowTrigger;

/// Routes calls to per-link scheduler actors
///
/// # Example
///
/// ```ignore
/// use linkeval_scheduler::prelude::*;
///
/// let (timers, fired) = TokioTimerService::new();
/// let host = Arc::new(SchedulerHost::new(
///     Arc::new(InMemoryStateStore::new()),
///     Arc::new(timers),
///     Arc::new(trigger),
///     SchedulerConfig::default(),
/// ));
///
/// tokio::spawn(host.clone().run_timer_loop(fired, shutdown_rx));
/// host.record_event(ClickEvent::new("acc1", "link1", "https://a", "US")).await?;
/// ```
pub struct SchedulerHost {
    store: Arc<dyn StateStore>,
    timers: Arc<dyn TimerService>,
    trigger: Arc<dyn WorkflowTrigger>,
    config: SchedulerConfig,
    instances: Arc<Registry>,
    next_instance_id: AtomicU64,
}

impl SchedulerHost {
    pub fn new(
        store: Arc<dyn StateStore>,
        timers: Arc<dyn TimerService>,
        trigger: Arc<dyn WorkflowTrigger>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            timers,
            trigger,
            config,
            instances: Arc::new(Registry::new()),
            next_instance_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of live per-link actors
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Record a click for `event.link_id`
    ///
    /// Returns the deadline the link's timer is now armed for.
    #[instrument(skip(self, event), fields(link_id = %event.link_id))]
    pub async fn record_event(&self, event: ClickEvent) -> Result<Instant, SchedulerError> {
        let link_id = event.link_id.clone();
        self.call(&link_id, |reply| Command::RecordEvent { event, reply })
            .await
    }

    /// Deliver one `TimerFired` to a link
    ///
    /// A retryable failure also re-arms the link's timer per the
    /// redelivery policy, unless the link is already armed again.
    #[instrument(skip(self))]
    pub async fn deliver_timer(&self, link_id: &str) -> Result<FireOutcome, SchedulerError> {
        self.call(link_id, |reply| Command::TimerFired { reply })
            .await
    }

    /// Current state of a link's scheduler
    ///
    /// Links without a live actor are read straight from the store and
    /// timer service; no actor is started for a read.
    pub async fn state(&self, link_id: &str) -> Result<SchedulerState, SchedulerError> {
        if self.instances.contains_key(link_id) {
            return self
                .call(link_id, |reply| Command::Snapshot { reply })
                .await;
        }

        Ok(SchedulerState {
            latest_payload: self.store.get(link_id).await?,
            timer_deadline: self.timers.pending(link_id).await?,
        })
    }

    async fn call<T>(
        &self,
        link_id: &str,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let unavailable = || SchedulerError::InstanceUnavailable {
            link_id: link_id.to_string(),
        };

        let (reply, rx) = oneshot::channel();
        let mut command = make(reply);

        // An actor that stopped for idleness hands the command back; the
        // retry lands on its replacement.
        for _ in 0..2 {
            match self.instance(link_id).send(command).await {
                Ok(()) => return rx.await.map_err(|_| unavailable())?,
                Err(returned) => command = returned,
            }
        }
        Err(unavailable())
    }

    fn instance(&self, link_id: &str) -> InstanceHandle {
        match self.instances.entry(link_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    debug!(%link_id, "scheduler actor stopping, starting replacement");
                    let previous = occupied.get().stopped();
                    occupied.insert(self.spawn_instance(link_id, Some(previous)));
                }
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                debug!(%link_id, "activating scheduler instance");
                vacant.insert(self.spawn_instance(link_id, None)).clone()
            }
        }
    }

    fn spawn_instance(
        &self,
        link_id: &str,
        previous: Option<watch::Receiver<bool>>,
    ) -> InstanceHandle {
        let scheduler = EvaluationScheduler::new(
            link_id,
            Arc::clone(&self.store),
            Arc::clone(&self.timers),
            Arc::clone(&self.trigger),
            self.config.debounce_window,
        );
        let ctx = ActorContext {
            id: self.next_instance_id.fetch_add(1, Ordering::SeqCst),
            inbox_capacity: self.config.inbox_capacity,
            idle_timeout: self.config.idle_timeout,
            redelivery: self.config.redelivery.clone(),
            registry: Arc::downgrade(&self.instances),
            previous,
        };
        InstanceHandle::spawn(scheduler, ctx)
    }

    /// Consume elapsed timers until `shutdown` flips to true
    ///
    /// Deliveries for different links run concurrently; each link's actor
    /// still serializes its own handlers.
    pub async fn run_timer_loop(
        self: Arc<Self>,
        mut fired: FiredTimers,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut deliveries = JoinSet::new();
        info!("timer delivery loop started");

        loop {
            tokio::select! {
                key = fired.recv() => {
                    let Some(link_id) = key else {
                        debug!("fired timer channel closed");
                        break;
                    };
                    let host = Arc::clone(&self);
                    deliveries.spawn(async move {
                        // The actor logs failures and arms any redelivery.
                        let _ = host.deliver_timer(&link_id).await;
                    });
                }
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "timer delivery task panicked");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let in_flight = deliveries.len();
        if in_flight > 0 {
            info!(in_flight, "aborting in-flight timer deliveries");
        }
        deliveries.shutdown().await;
        info!("timer delivery loop stopped");
    }
}
