//! # Evaluation Scheduler
//!
//! Per-link debounced scheduling of destination evaluation workflows.
//!
//! Clicks for a link arrive in bursts. Each click overwrites the link's
//! stored payload and pushes its single timer out to `now + window`. When
//! the clicks stop for a full window, the timer fires once and the latest
//! click is handed to the evaluation workflow. Clicks and armed timers are
//! both persisted, so a pending fire survives a restart.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐ record_event  ┌──────────────────────────────┐
//! │ ingestion API │──────────────▶│        SchedulerHost          │
//! └───────────────┘               │  (one mailbox actor per link) │
//!                                 └──────────────────────────────┘
//!                                     │ store.put       ▲ TimerFired
//!                                     │ timers.schedule │
//!                                     ▼                 │
//!           ┌────────────┐   ┌──────────────────┐       │
//!           │ StateStore │   │  TimerService    │───────┘
//!           └────────────┘   └──────────────────┘
//!                                │          │ on fire
//!                      save/load │          ▼
//!                                ▼    ┌─────────────────┐
//!                     ┌────────────┐  │ WorkflowTrigger │
//!                     │ TimerStore │  └─────────────────┘
//!                     └────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use linkeval_scheduler::prelude::*;
//!
//! let store = Arc::new(InMemoryStateStore::new());
//! let (timers, fired) = TokioTimerService::with_store(store.clone());
//! let timers = Arc::new(timers);
//! timers.restore().await?;
//!
//! let host = Arc::new(SchedulerHost::new(
//!     store,
//!     timers,
//!     Arc::new(HttpWorkflowTrigger::new(url, Duration::from_secs(10))?),
//!     SchedulerConfig::from_env(),
//! ));
//! tokio::spawn(host.clone().run_timer_loop(fired, shutdown_rx));
//!
//! host.record_event(ClickEvent::new("acc1", "link1", "https://a", "US")).await?;
//! ```

pub mod config;
pub mod model;
pub mod persistence;
pub mod reliability;
pub mod scheduler;
pub mod testing;
pub mod timer;
pub mod trigger;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::model::{
        ClickEvent, EvaluationParams, FireOutcome, SchedulerPhase, SchedulerState, WorkflowHandle,
    };
    pub use crate::persistence::{
        InMemoryStateStore, PostgresStateStore, StateStore, StoreError, TimerStore,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::scheduler::{EvaluationScheduler, SchedulerError, SchedulerHost};
    pub use crate::timer::{FiredTimers, TimerError, TimerService, TokioTimerService};
    pub use crate::trigger::{HttpWorkflowTrigger, TriggerError, WorkflowTrigger};
}

// Re-export key types at crate root
pub use config::{SchedulerConfig, DEFAULT_DEBOUNCE_WINDOW};
pub use model::{
    ClickEvent, EvaluationParams, FireOutcome, SchedulerPhase, SchedulerState, WorkflowHandle,
};
pub use persistence::{InMemoryStateStore, PostgresStateStore, StateStore, StoreError, TimerStore};
pub use reliability::RetryPolicy;
pub use scheduler::{EvaluationScheduler, InstanceHandle, SchedulerError, SchedulerHost};
pub use timer::{FiredTimers, TimerError, TimerService, TokioTimerService};
pub use trigger::{HttpWorkflowTrigger, TriggerError, WorkflowTrigger};
