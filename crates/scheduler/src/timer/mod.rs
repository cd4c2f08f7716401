//! Timer facility
//!
//! One timer slot per link id. Scheduling a slot that is already armed
//! replaces it. An elapsed slot is consumed before its link id is handed
//! to the host for delivery. With a [`TimerStore`](crate::persistence::TimerStore)
//! attached, armed slots survive a restart and are re-armed by
//! [`TokioTimerService::restore`].

mod service;
mod tokio_timer;

pub use service::{TimerError, TimerService};
pub(crate) use service::wall_clock;
pub use tokio_timer::{FiredTimers, TokioTimerService};
