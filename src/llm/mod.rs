//! Chat model client with tool calling
//!
//! `ChatModel` is one request/response round trip; `ChatSession` keeps the
//! history and runs the function-invocation loop against a `ToolRegistry`.

mod azure_openai;
mod types;

pub use azure_openai::{AzureOpenAiChat, DEFAULT_CHAT_API_VERSION};
pub use types::{ChatMessage, ChatRole, ChatToolCall, FunctionCall};

use crate::tools::{ToolRegistry, ToolSpec};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name for logging
    fn name(&self) -> &str;

    /// Send the conversation and return the assistant's reply
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage>;
}

/// Conversation with automatic tool invocation
pub struct ChatSession {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    history: Vec<ChatMessage>,
    max_iterations: usize,
}

impl ChatSession {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            history: Vec::new(),
            max_iterations: 10,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history.insert(0, ChatMessage::system(prompt));
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Add a user prompt and loop until the model answers without tool calls.
    ///
    /// Tool failures are handed back to the model as tool results.
    pub async fn send(&mut self, prompt: &str) -> Result<String> {
        self.history.push(ChatMessage::user(prompt));
        let specs = self.tools.specs();

        for iteration in 1..=self.max_iterations {
            let reply = self.model.complete(&self.history, &specs).await?;
            let calls = reply.tool_calls.clone();
            self.history.push(reply);

            if calls.is_empty() {
                let text = self
                    .history
                    .last()
                    .and_then(|m| m.content.clone())
                    .unwrap_or_default();
                tracing::debug!("{} answered after {} iteration(s)", self.model.name(), iteration);
                return Ok(text);
            }

            for call in calls {
                tracing::info!("Invoking tool {} ({})", call.function.name, call.id);
                let output = match self
                    .tools
                    .execute(&call.function.name, call.arguments_json())
                    .await
                {
                    Ok(result) => result.output,
                    Err(e) => format!("Error: {:#}", e),
                };
                self.history.push(ChatMessage::tool_result(call.id, output));
            }
        }

        anyhow::bail!(
            "No final answer after {} model round trips",
            self.max_iterations
        )
    }
}
