//! HTTP client for the hosted agent service
//!
//! SECURITY: the API key or bearer token is only sent to the configured
//! project endpoint.

use super::types::{
    Agent, CreateAgentRequest, CreateRunRequest, ListPage, NewMessage, Run, Thread,
    ThreadMessage, ToolApproval, ToolOutput,
};
use super::{AgentError, AgentService, RunService};
use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

/// API version sent with every request
pub const DEFAULT_API_VERSION: &str = "2025-05-15-preview";

/// Page size used when listing thread messages
const MESSAGE_PAGE_SIZE: u32 = 100;

/// How requests are authenticated
#[derive(Clone, Default)]
pub enum Credential {
    /// `api-key` header
    ApiKey(String),
    /// `Authorization: Bearer` header (e.g. an Entra ID access token)
    Bearer(String),
    #[default]
    Anonymous,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(***)"),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

pub struct AgentsClient {
    client: reqwest::Client,
    endpoint: Url,
    api_version: String,
    credential: Credential,
}

impl AgentsClient {
    pub fn new(endpoint: &str, credential: Credential) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .with_context(|| format!("Invalid project endpoint: {}", endpoint))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_version: DEFAULT_API_VERSION.to_string(),
            credential,
        })
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        self.api_version = api_version.to_string();
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build the URL for a path below the project endpoint
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::ApiKey(key) => request.header("api-key", key),
            Credential::Bearer(token) => request.bearer_auth(token),
            Credential::Anonymous => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AgentError> {
        let response = self
            .authorize(request)
            .query(&[("api-version", self.api_version.as_str())])
            .send()
            .await
            .map_err(AgentError::from_network_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(AgentError::from_network_error)?;

        if !status.is_success() {
            tracing::debug!(operation, %status, "Agent service error body: {}", body);
            return Err(AgentError::from_http_status(status, body));
        }

        tracing::trace!(operation, "Agent service response: {}", body);
        serde_json::from_str(&body).map_err(|source| AgentError::Decode { operation, source })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<T, AgentError> {
        self.send(operation, self.client.post(self.url(path)).json(body))
            .await
    }

    async fn delete(&self, operation: &'static str, path: &str) -> Result<(), AgentError> {
        let _: serde_json::Value = self
            .send(operation, self.client.delete(self.url(path)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RunService for AgentsClient {
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AgentError> {
        let path = format!("threads/{}/runs/{}", thread_id, run_id);
        self.send("get_run", self.client.get(self.url(&path))).await
    }

    async fn submit_tool_approvals(
        &self,
        thread_id: &str,
        run_id: &str,
        approvals: &[ToolApproval],
    ) -> Result<Run, AgentError> {
        let path = format!("threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id);
        self.post(
            "submit_tool_approvals",
            &path,
            &json!({ "tool_approvals": approvals }),
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AgentError> {
        let path = format!("threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id);
        self.post(
            "submit_tool_outputs",
            &path,
            &json!({ "tool_outputs": outputs }),
        )
        .await
    }
}

#[async_trait]
impl AgentService for AgentsClient {
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, AgentError> {
        self.post("create_agent", "assistants", request).await
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), AgentError> {
        self.delete("delete_agent", &format!("assistants/{}", agent_id))
            .await
    }

    async fn create_thread(&self) -> Result<Thread, AgentError> {
        self.post("create_thread", "threads", &json!({})).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), AgentError> {
        self.delete("delete_thread", &format!("threads/{}", thread_id))
            .await
    }

    async fn create_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, AgentError> {
        let path = format!("threads/{}/messages", thread_id);
        self.post("create_message", &path, message).await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: &CreateRunRequest,
    ) -> Result<Run, AgentError> {
        let path = format!("threads/{}/runs", thread_id);
        self.post("create_run", &path, request).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AgentError> {
        let url = self.url(&format!("threads/{}/messages", thread_id));
        let limit = MESSAGE_PAGE_SIZE.to_string();
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("order", "asc"), ("limit", limit.as_str())]);
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor.as_str())]);
            }

            let page: ListPage<ThreadMessage> = self.send("list_messages", request).await?;
            let done = !page.has_more || page.data.is_empty();
            after = page.last_id.or_else(|| page.data.last().map(|m| m.id.clone()));
            messages.extend(page.data);

            if done || after.is_none() {
                break;
            }
        }

        tracing::debug!("Listed {} messages for thread {}", messages.len(), thread_id);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_paths_without_dropping_project_segment() {
        let client = AgentsClient::new(
            "https://example.services.ai.azure.com/api/projects/demo/",
            Credential::Anonymous,
        )
        .unwrap();
        assert_eq!(
            client.url("threads/t1/runs/r1"),
            "https://example.services.ai.azure.com/api/projects/demo/threads/t1/runs/r1"
        );
        assert_eq!(
            client.url("/assistants"),
            "https://example.services.ai.azure.com/api/projects/demo/assistants"
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = AgentsClient::new("not a url", Credential::Anonymous)
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid project endpoint"));
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let debug = format!("{:?}", Credential::ApiKey("sk-secret".to_string()));
        assert!(!debug.contains("sk-secret"));
    }
}
