//! Client side of the hosted agent service
//!
//! The service owns agents, threads, messages and runs. This module only
//! consumes it: `RunService` is the narrow surface the run loop needs,
//! `AgentService` adds everything the demo flows use around it.

mod client;
mod error;
mod types;

pub use client::{AgentsClient, Credential, DEFAULT_API_VERSION};
pub use error::AgentError;
pub use types::{
    Agent, AgentTool, CreateAgentRequest, CreateRunRequest, FunctionDefinition, ImageFileContent,
    McpToolResource, MessageContent, MessageRole, NewMessage, RequiredAction, Run, RunError,
    RunStatus, TextContent, Thread, ThreadMessage, ToolApproval, ToolCallRequest, ToolOutput,
    ToolResources,
};

use async_trait::async_trait;

/// Operations the run loop performs against a run
#[async_trait]
pub trait RunService: Send + Sync {
    /// Fetch the current state of a run
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AgentError>;

    /// Submit a full batch of approval decisions for a run in `requires_action`
    async fn submit_tool_approvals(
        &self,
        thread_id: &str,
        run_id: &str,
        approvals: &[ToolApproval],
    ) -> Result<Run, AgentError>;

    /// Submit the outputs of locally executed function tools
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AgentError>;
}

/// Full set of operations consumed from the agent service
#[async_trait]
pub trait AgentService: RunService {
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, AgentError>;

    async fn delete_agent(&self, agent_id: &str) -> Result<(), AgentError>;

    async fn create_thread(&self) -> Result<Thread, AgentError>;

    async fn delete_thread(&self, thread_id: &str) -> Result<(), AgentError>;

    async fn create_message(
        &self,
        thread_id: &str,
        message: &NewMessage,
    ) -> Result<ThreadMessage, AgentError>;

    async fn create_run(
        &self,
        thread_id: &str,
        request: &CreateRunRequest,
    ) -> Result<Run, AgentError>;

    /// All messages of a thread, oldest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AgentError>;
}

/// Make sure messages are ordered by creation time.
///
/// The service is asked for ascending order; if it hands back anything else
/// the messages are stable-sorted so equal timestamps keep their service order.
pub fn ensure_chronological(messages: &mut [ThreadMessage]) {
    let ordered = messages
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at);
    if !ordered {
        tracing::warn!("Thread messages arrived out of order, sorting by creation time");
        messages.sort_by_key(|m| m.created_at);
    }
}
