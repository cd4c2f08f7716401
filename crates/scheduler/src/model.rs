//! Data carried through the scheduler
//!
//! - [`ClickEvent`] is the debounced payload (latest click for a link)
//! - [`EvaluationParams`] is what the downstream workflow receives
//! - [`SchedulerState`] is a point-in-time view of one link's scheduler

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The latest click recorded for a link
///
/// Older clicks are overwritten in full, never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    /// Opaque tenant identifier
    pub account_id: String,

    /// Link the click belongs to (the scheduler key)
    pub link_id: String,

    /// Destination the link resolved to
    pub destination_url: String,

    /// Country code of the visitor
    pub destination_country_code: String,
}

impl ClickEvent {
    pub fn new(
        account_id: impl Into<String>,
        link_id: impl Into<String>,
        destination_url: impl Into<String>,
        destination_country_code: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            link_id: link_id.into(),
            destination_url: destination_url.into(),
            destination_country_code: destination_country_code.into(),
        }
    }
}

/// Parameters for the destination evaluation workflow
///
/// The country code is not forwarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationParams {
    pub link_id: String,
    pub account_id: String,
    pub destination_url: String,
}

impl From<&ClickEvent> for EvaluationParams {
    fn from(event: &ClickEvent) -> Self {
        Self {
            link_id: event.link_id.clone(),
            account_id: event.account_id.clone(),
            destination_url: event.destination_url.clone(),
        }
    }
}

/// Handle to a workflow instance created downstream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowHandle {
    pub id: String,
}

/// Whether a timer is pending for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// No timer armed
    Idle,

    /// A timer is scheduled for a future deadline
    Armed,
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Armed => write!(f, "armed"),
        }
    }
}

/// Snapshot of one link's scheduler
///
/// `timer_deadline` comes from the timer service, not from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub latest_payload: Option<ClickEvent>,
    pub timer_deadline: Option<Instant>,
}

impl SchedulerState {
    /// Armed iff a deadline is pending
    pub fn phase(&self) -> SchedulerPhase {
        if self.timer_deadline.is_some() {
            SchedulerPhase::Armed
        } else {
            SchedulerPhase::Idle
        }
    }
}

/// Result of a successful fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireOutcome {
    /// Workflow created downstream
    pub workflow: WorkflowHandle,

    /// Payload that was dispatched
    pub dispatched: EvaluationParams,
}
