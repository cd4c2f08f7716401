//! WorkflowTrigger trait definition

use async_trait::async_trait;

use crate::model::{EvaluationParams, WorkflowHandle};

/// Error type for workflow creation
#[derive(Debug, Clone, thiserror::Error)]
pub enum TriggerError {
    /// Request could not be sent or the connection failed
    #[error("http error: {0}")]
    Http(String),

    /// Workflow service answered with a non-success status
    #[error("workflow service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Success response could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Creates the downstream evaluation workflow
///
/// Called at most once per delivered fire. Timeouts and retries inside a
/// single call are the implementation's concern.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync + 'static {
    async fn create(&self, params: EvaluationParams) -> Result<WorkflowHandle, TriggerError>;
}
