//! Reliability patterns
//!
//! - [`RetryPolicy`]: backoff schedule for re-delivering a failed fire

mod retry;

pub use retry::RetryPolicy;
