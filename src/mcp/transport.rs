//! STDIO transport: spawn a tool server and exchange newline-delimited
//! JSON-RPC messages over its stdin/stdout.

use super::error::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Default time to wait for a response
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct StdioTransport {
    child: Mutex<Child>,
    next_id: AtomicU64,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn a new tool server process
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, expand_env_vars(value));
        }

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("failed to capture stdout".to_string()))?;

        tracing::debug!("Spawned tool server: {} {:?}", command, args);

        Ok(Self {
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        };

        let line = serde_json::to_string(&request)?;
        tracing::debug!("Tool request: {}", line);
        self.write_line(&line).await?;

        let response = tokio::time::timeout(self.request_timeout, self.read_response(id))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                secs: self.request_timeout.as_secs(),
            })??;

        if let Some(error) = response.error {
            return Err(McpError::Remote {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("{} response missing result", method)))
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
        };
        let line = serde_json::to_string(&notification)?;
        tracing::debug!("Tool notification: {}", line);
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read lines until the response with `expected_id` shows up, skipping
    /// notifications and stray output
    async fn read_response(&self, expected_id: u64) -> Result<JsonRpcResponse, McpError> {
        let mut stdout = self.stdout.lock().await;
        let mut line = String::new();
        loop {
            line.clear();
            if stdout.read_line(&mut line).await? == 0 {
                return Err(McpError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(response) if response.id.as_u64() == Some(expected_id) => {
                    tracing::debug!("Tool response: {}", trimmed);
                    return Ok(response);
                }
                Ok(_) | Err(_) => {
                    tracing::debug!("Skipping unrelated line from tool server: {}", trimmed);
                }
            }
        }
    }

    /// Check if the child process is still running
    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Kill the child process
    pub async fn kill(&self) -> Result<(), McpError> {
        let mut child = self.child.lock().await;
        child.kill().await?;
        Ok(())
    }
}

/// Expand environment variable references like ${VAR} in a string
fn expand_env_vars(input: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
