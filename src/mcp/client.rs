//! Client for a single stdio tool server.

use super::error::McpError;
use super::transport::StdioTransport;
use super::types::{
    McpToolResult, ServerCapabilities, ServerInfo, ToolCallParams, PROTOCOL_VERSION,
};
use crate::tools::ToolSpec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// How to launch a tool server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerCommand {
    /// Display name
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment; values may reference `${VAR}`
    pub env: HashMap<String, String>,
}

impl ToolServerCommand {
    /// Split a command line on whitespace; the first word is the program
    pub fn parse(name: &str, command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace().map(String::from);
        let command = words.next()?;
        Some(Self {
            name: name.to_string(),
            command,
            args: words.collect(),
            env: HashMap::new(),
        })
    }
}

pub struct McpClient {
    name: String,
    transport: StdioTransport,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

impl McpClient {
    /// Spawn the server and perform the initialize handshake
    pub async fn connect(config: &ToolServerCommand) -> Result<Self, McpError> {
        Self::connect_with_timeout(config, None).await
    }

    pub async fn connect_with_timeout(
        config: &ToolServerCommand,
        request_timeout: Option<Duration>,
    ) -> Result<Self, McpError> {
        let mut transport = StdioTransport::spawn(&config.command, &config.args, &config.env).await?;
        if let Some(timeout) = request_timeout {
            transport = transport.with_request_timeout(timeout);
        }

        let init = transport
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "agentloop",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;
        transport.notify("notifications/initialized", None).await?;

        let capabilities: ServerCapabilities = init
            .get("capabilities")
            .cloned()
            .and_then(|c| serde_json::from_value(c).ok())
            .unwrap_or_default();
        let server_info: ServerInfo = init
            .get("serverInfo")
            .cloned()
            .and_then(|c| serde_json::from_value(c).ok())
            .unwrap_or_default();

        tracing::info!(
            "Connected to tool server '{}' ({} {})",
            config.name,
            server_info.name,
            server_info.version
        );

        Ok(Self {
            name: config.name.clone(),
            transport,
            capabilities,
            server_info,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Enumerate the tools the server offers
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        if self.capabilities.tools.is_none() {
            tracing::warn!("Tool server '{}' did not advertise tools", self.name);
            return Ok(Vec::new());
        }

        let result = self.transport.request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools list: {e}")))
    }

    /// Invoke a tool by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("failed to parse result of {name}: {e}")))
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    /// Stop the server process
    pub async fn close(&self) -> Result<(), McpError> {
        tracing::info!("Disconnecting from tool server '{}'", self.name);
        self.transport.kill().await
    }
}
