//! Scheduler error taxonomy

use crate::persistence::StoreError;
use crate::timer::TimerError;
use crate::trigger::TriggerError;

/// Errors surfaced by scheduler operations
///
/// None of these are swallowed inside the scheduler; every handler returns
/// them to its caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// Durable read or write did not complete
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    /// A fire found no stored click for the link
    #[error("click data not found for link {link_id}")]
    MissingPayload { link_id: String },

    /// The workflow trigger rejected or failed the request
    #[error("downstream dispatch failed: {0}")]
    DownstreamDispatchFailure(#[from] TriggerError),

    /// The timer facility refused to arm
    #[error("timer failure: {0}")]
    Timer(#[from] TimerError),

    /// The link's actor stopped before answering
    #[error("scheduler instance for link {link_id} is unavailable")]
    InstanceUnavailable { link_id: String },
}

impl SchedulerError {
    /// Whether delivering the same fire again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageFailure(_) | Self::DownstreamDispatchFailure(_)
        )
    }

    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageFailure(_) => "storage_failure",
            Self::MissingPayload { .. } => "missing_payload",
            Self::DownstreamDispatchFailure(_) => "downstream_dispatch_failure",
            Self::Timer(_) => "timer_failure",
            Self::InstanceUnavailable { .. } => "instance_unavailable",
        }
    }
}
