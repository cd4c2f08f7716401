//! Test doubles for the downstream workflow trigger

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{EvaluationParams, WorkflowHandle};
use crate::trigger::{TriggerError, WorkflowTrigger};

/// Workflow trigger that records every request
///
/// Failures can be queued with [`fail_next`](Self::fail_next); each queued
/// failure is consumed by one `create` call. Failed calls are recorded too.
#[derive(Default)]
pub struct RecordingWorkflowTrigger {
    calls: Mutex<Vec<EvaluationParams>>,
    pending_failures: AtomicU32,
    created: AtomicU32,
}

impl RecordingWorkflowTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Every request received, in order
    pub fn calls(&self) -> Vec<EvaluationParams> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of workflows successfully created
    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowTrigger for RecordingWorkflowTrigger {
    async fn create(&self, params: EvaluationParams) -> Result<WorkflowHandle, TriggerError> {
        self.calls.lock().push(params);

        let should_fail = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TriggerError::Status {
                status: 503,
                body: "workflow service unavailable".to_string(),
            });
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(WorkflowHandle {
            id: format!("wf-{}", n),
        })
    }
}
