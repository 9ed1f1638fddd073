//! Serves a `ToolRegistry` over newline-delimited JSON-RPC.
//!
//! Answers `initialize`, `ping`, `tools/list` and `tools/call`. Notifications
//! get no reply. The loop ends when the input reaches EOF.

use super::types::{
    codes, IncomingMessage, JsonRpcResponse, McpToolResult, ToolCallParams, PROTOCOL_VERSION,
};
use crate::tools::ToolRegistry;
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub struct ToolServer {
    registry: Arc<ToolRegistry>,
    name: String,
    version: String,
}

impl ToolServer {
    pub fn new(name: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Serve until `reader` is exhausted
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            "Tool server '{}' ready with {} tools",
            self.name,
            self.registry.len()
        );

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        tracing::info!("Tool server '{}' input closed, shutting down", self.name);
        Ok(())
    }

    /// Handle one input line, returning the response to send (if any)
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Unparseable request: {}", e);
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        let message: IncomingMessage = match serde_json::from_value(value.clone()) {
            Ok(message) => message,
            Err(e) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                return Some(JsonRpcResponse::failure(
                    id,
                    codes::INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ));
            }
        };

        let Some(id) = message.id.clone() else {
            tracing::debug!("Notification: {}", message.method);
            return None;
        };

        Some(self.dispatch(id, message).await)
    }

    async fn dispatch(&self, id: Value, message: IncomingMessage) -> JsonRpcResponse {
        tracing::debug!("Request {}: {}", id, message.method);
        match message.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": self.name, "version": self.version }
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": self.registry.specs() })),
            "tools/call" => self.call_tool(id, message.params).await,
            other => JsonRpcResponse::failure(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        }
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                return JsonRpcResponse::failure(id, codes::INVALID_PARAMS, "Missing params")
            }
            Err(e) => {
                return JsonRpcResponse::failure(
                    id,
                    codes::INVALID_PARAMS,
                    format!("Invalid params: {}", e),
                )
            }
        };

        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };

        tracing::info!("{} called", params.name);
        let result = match self.registry.execute(&params.name, arguments).await {
            Ok(result) => McpToolResult::text(result.output, !result.success),
            Err(e) => McpToolResult::text(format!("{:#}", e), true),
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, codes::INVALID_PARAMS, e.to_string()),
        }
    }
}
