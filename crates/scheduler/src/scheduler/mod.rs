//! Per-link debounced scheduling
//!
//! - [`EvaluationScheduler`]: state manager, debounce controller and
//!   dispatch handler for one link
//! - [`SchedulerHost`]: routes calls to one serial actor per link and
//!   delivers fired timers
//! - [`SchedulerError`]: failure taxonomy surfaced to callers

mod actor;
mod error;
mod host;
mod instance;

pub use actor::InstanceHandle;
pub use error::SchedulerError;
pub use host::SchedulerHost;
pub use instance::EvaluationScheduler;
