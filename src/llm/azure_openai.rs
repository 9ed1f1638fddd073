//! Azure OpenAI chat-completions provider

use super::types::{ChatMessage, ChatRequest, ChatResponse, FunctionTool};
use super::ChatModel;
use crate::agents::Credential;
use crate::tools::ToolSpec;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CHAT_API_VERSION: &str = "2024-10-21";

pub struct AzureOpenAiChat {
    client: reqwest::Client,
    endpoint: Url,
    deployment: String,
    api_version: String,
    credential: Credential,
}

impl AzureOpenAiChat {
    pub fn new(endpoint: &str, deployment: &str, credential: Credential) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .with_context(|| format!("Invalid model endpoint: {}", endpoint))?;
        if deployment.trim().is_empty() {
            anyhow::bail!("Model deployment name must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            deployment: deployment.to_string(),
            api_version: DEFAULT_CHAT_API_VERSION.to_string(),
            credential,
        })
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        self.api_version = api_version.to_string();
        self
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.as_str().trim_end_matches('/'),
            self.deployment
        )
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiChat {
    fn name(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        let request = ChatRequest {
            messages,
            tools: tools.iter().map(FunctionTool::from).collect(),
        };

        let builder = self
            .client
            .post(self.completions_url())
            .query(&[("api-version", self.api_version.as_str())])
            .json(&request);
        let builder = match &self.credential {
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Anonymous => builder,
        };

        let response = builder
            .send()
            .await
            .context("Failed to send request to Azure OpenAI")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                "Chat request failed with {} message(s) and {} tool(s)",
                messages.len(),
                tools.len()
            );
            anyhow::bail!("Azure OpenAI API error ({}): {}", status, error_text);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .context("Chat completion returned no choices")?;
        tracing::debug!(
            "Chat completion finished: {}",
            choice.finish_reason.as_deref().unwrap_or("unknown")
        );
        Ok(choice.message)
    }
}
