//! Adapts remote tools to the local `Tool` trait (with timeout).

use super::client::McpClient;
use crate::tools::{Tool, ToolResult, ToolSpec};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for remote tool calls (30 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct McpToolWrapper {
    spec: ToolSpec,
    client: Arc<McpClient>,
    timeout_secs: u64,
}

impl McpToolWrapper {
    pub fn new(spec: ToolSpec, client: Arc<McpClient>) -> Self {
        Self {
            spec,
            client,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec.input_schema.clone()
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let call = self.client.call_tool(&self.spec.name, params);
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), call).await {
            Ok(Ok(result)) if result.is_error => Ok(ToolResult::error(result.to_text())),
            Ok(Ok(result)) => Ok(ToolResult::success(result.to_text())),
            Ok(Err(e)) => Ok(ToolResult::error(format!("Tool call failed: {}", e))),
            Err(_) => Ok(ToolResult::error(format!(
                "Call to '{}' on tool server '{}' timed out after {}s",
                self.spec.name,
                self.client.name(),
                self.timeout_secs
            ))),
        }
    }
}

/// Discover a server's tools and wrap each one
pub async fn wrap_server_tools(
    client: Arc<McpClient>,
    timeout_secs: Option<u64>,
) -> Result<Vec<Arc<dyn Tool>>> {
    let specs = client.list_tools().await?;
    Ok(specs
        .into_iter()
        .map(|spec| {
            let mut wrapper = McpToolWrapper::new(spec, client.clone());
            if let Some(secs) = timeout_secs {
                wrapper = wrapper.with_timeout(secs);
            }
            Arc::new(wrapper) as Arc<dyn Tool>
        })
        .collect())
}
