//! HTTP workflow trigger

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use super::workflow::{TriggerError, WorkflowTrigger};
use crate::model::{EvaluationParams, WorkflowHandle};

#[derive(Serialize)]
struct CreateWorkflowRequest<'a> {
    params: &'a EvaluationParams,
}

/// Creates workflows by POSTing `{"params": {...}}` to a workflow endpoint
///
/// A 2xx response must carry a JSON body with an `id` field.
#[derive(Clone)]
pub struct HttpWorkflowTrigger {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpWorkflowTrigger {
    /// Create a trigger for `endpoint` with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TriggerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TriggerError::Http(e.to_string()))?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Create a trigger around an existing client
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WorkflowTrigger for HttpWorkflowTrigger {
    #[instrument(skip(self), fields(endpoint = %self.endpoint, link_id = %params.link_id))]
    async fn create(&self, params: EvaluationParams) -> Result<WorkflowHandle, TriggerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&CreateWorkflowRequest { params: &params })
            .send()
            .await
            .map_err(|e| TriggerError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriggerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let handle: WorkflowHandle = response
            .json()
            .await
            .map_err(|e| TriggerError::InvalidResponse(e.to_string()))?;

        debug!(workflow_id = %handle.id, "workflow service accepted request");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let params = EvaluationParams {
            link_id: "link1".to_string(),
            account_id: "acc1".to_string(),
            destination_url: "https://a".to_string(),
        };

        let body = serde_json::to_value(CreateWorkflowRequest { params: &params }).unwrap();
        assert_eq!(
            body,
            json!({
                "params": {
                    "linkId": "link1",
                    "accountId": "acc1",
                    "destinationUrl": "https://a"
                }
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let trigger =
            HttpWorkflowTrigger::new("http://127.0.0.1:9/workflows", Duration::from_millis(500))
                .unwrap();
        let params = EvaluationParams {
            link_id: "link1".to_string(),
            account_id: "acc1".to_string(),
            destination_url: "https://a".to_string(),
        };

        let result = trigger.create(params).await;
        assert!(matches!(result, Err(TriggerError::Http(_))));
    }
}
