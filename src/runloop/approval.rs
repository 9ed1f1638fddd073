//! Approval policies for pending tool calls.
//!
//! A policy turns one `ToolCallRequest` into one `ToolApproval`. The driver
//! asks for every pending call before it submits anything.

use crate::agents::{ToolApproval, ToolCallRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use glob::Pattern;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    /// Decide on a single tool call. The returned decision must carry the
    /// call's identifier.
    async fn decide(&self, call: &ToolCallRequest) -> Result<ToolApproval>;
}

/// Approves every call and attaches fixed headers.
///
/// No authorization check happens here; only use it against tool servers
/// you trust.
pub struct AutoApprove {
    headers: HashMap<String, String>,
    warned: AtomicBool,
}

impl AutoApprove {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self {
            headers,
            warned: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ApprovalPolicy for AutoApprove {
    async fn decide(&self, call: &ToolCallRequest) -> Result<ToolApproval> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!("Auto-approving tool calls without an authorization check");
        }
        tracing::info!(
            "Approving tool call: {}, Arguments: {}",
            call.name,
            call.arguments
        );
        Ok(ToolApproval::approve(&call.id).with_headers(self.headers.clone()))
    }
}

/// Approves calls to tools matching one of a set of glob patterns and denies
/// the rest.
pub struct AllowListPolicy {
    patterns: Vec<Pattern>,
    headers: HashMap<String, String>,
}

impl AllowListPolicy {
    pub fn new(patterns: &[String], headers: HashMap<String, String>) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("Invalid tool pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns, headers })
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(tool_name))
    }
}

#[async_trait]
impl ApprovalPolicy for AllowListPolicy {
    async fn decide(&self, call: &ToolCallRequest) -> Result<ToolApproval> {
        if self.allows(&call.name) {
            tracing::info!("Tool call {} ({}) matches allow-list", call.id, call.name);
            Ok(ToolApproval::approve(&call.id).with_headers(self.headers.clone()))
        } else {
            tracing::warn!("Denying tool call {} ({}): not allow-listed", call.id, call.name);
            Ok(ToolApproval::deny(&call.id))
        }
    }
}

/// Asks the operator on the terminal. Anything but `y`/`yes` denies.
pub struct PromptPolicy {
    input: Mutex<Box<dyn BufRead + Send>>,
    headers: HashMap<String, String>,
}

impl PromptPolicy {
    /// Read answers from stdin
    pub fn stdin(headers: HashMap<String, String>) -> Self {
        Self::with_reader(Box::new(std::io::BufReader::new(std::io::stdin())), headers)
    }

    pub fn with_reader(input: Box<dyn BufRead + Send>, headers: HashMap<String, String>) -> Self {
        Self {
            input: Mutex::new(input),
            headers,
        }
    }
}

#[async_trait]
impl ApprovalPolicy for PromptPolicy {
    async fn decide(&self, call: &ToolCallRequest) -> Result<ToolApproval> {
        let server = call
            .server_label
            .as_deref()
            .map(|label| format!(" on {}", label))
            .unwrap_or_default();
        eprint!(
            "{} {}{} {}\n  {} [y/N] ",
            "Approve tool call".bold().yellow(),
            call.name.bold(),
            server,
            format!("({})", call.id).dimmed(),
            call.arguments
        );
        std::io::stderr().flush().ok();

        let mut answer = String::new();
        let read = self
            .input
            .lock()
            .map_err(|_| anyhow::anyhow!("Approval input lock poisoned"))?
            .read_line(&mut answer)
            .context("Failed to read approval answer")?;
        if read == 0 {
            anyhow::bail!("Approval input closed before tool call {} was answered", call.id);
        }

        let approved = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
        tracing::info!(
            "Operator {} tool call {} ({})",
            if approved { "approved" } else { "denied" },
            call.id,
            call.name
        );

        Ok(if approved {
            ToolApproval::approve(&call.id).with_headers(self.headers.clone())
        } else {
            ToolApproval::deny(&call.id)
        })
    }
}
