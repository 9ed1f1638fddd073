//! Wire types for the hosted agent service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Status of a run
///
/// `Queued`, `InProgress` and `Cancelling` are still moving; `RequiresAction`
/// waits on the caller; everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
}

impl RunStatus {
    /// The run will not change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete
        )
    }

    /// The service is still working and only needs to be polled
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    /// Whether a run observed in `self` may next be observed in `next`.
    ///
    /// Terminal runs are never resurrected. `Queued` is only re-entered when
    /// a run resumes after its pending action was answered.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return next == self;
        }
        next != Self::Queued || matches!(self, Self::Queued | Self::RequiresAction)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by the service for a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A single tool invocation the agent wants performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Arguments as the JSON text sent by the service
    pub arguments: String,
    /// Remote tool server the call targets, for MCP calls
    pub server_label: Option<String>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            server_label: None,
        }
    }

    /// Parsed arguments; empty or malformed text yields an empty object
    pub fn arguments_json(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|e| {
            tracing::warn!("Tool call {} has malformed arguments: {}", self.id, e);
            Value::Object(Default::default())
        })
    }
}

/// What the service is waiting for while a run is in `requires_action`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawRequiredAction")]
pub enum RequiredAction {
    /// Approve or deny remote (MCP) tool calls
    SubmitToolApproval { tool_calls: Vec<ToolCallRequest> },
    /// Execute function tools locally and return their outputs
    SubmitToolOutputs { tool_calls: Vec<ToolCallRequest> },
    /// Action kind this client does not know how to answer
    Other { kind: String },
}

impl RequiredAction {
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::SubmitToolApproval { tool_calls } | Self::SubmitToolOutputs { tool_calls } => {
                tool_calls
            }
            Self::Other { .. } => &[],
        }
    }
}

#[derive(Deserialize)]
struct RawRequiredAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    submit_tool_approval: Option<RawToolCalls>,
    #[serde(default)]
    submit_tool_outputs: Option<RawToolCalls>,
}

#[derive(Deserialize, Default)]
struct RawToolCalls {
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    server_label: Option<String>,
    #[serde(default)]
    function: Option<RawFunctionCall>,
}

#[derive(Deserialize)]
struct RawFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl From<RawToolCall> for ToolCallRequest {
    fn from(raw: RawToolCall) -> Self {
        let (name, arguments) = match raw.function {
            Some(function) => (function.name, function.arguments),
            None => (
                raw.name.unwrap_or_default(),
                raw.arguments.unwrap_or_default(),
            ),
        };
        Self {
            id: raw.id,
            name,
            arguments,
            server_label: raw.server_label,
        }
    }
}

impl From<RawRequiredAction> for RequiredAction {
    fn from(raw: RawRequiredAction) -> Self {
        let convert = |calls: Option<RawToolCalls>| -> Vec<ToolCallRequest> {
            calls
                .unwrap_or_default()
                .tool_calls
                .into_iter()
                .map(ToolCallRequest::from)
                .collect()
        };
        match raw.kind.as_str() {
            "submit_tool_approval" => Self::SubmitToolApproval {
                tool_calls: convert(raw.submit_tool_approval),
            },
            "submit_tool_outputs" => Self::SubmitToolOutputs {
                tool_calls: convert(raw.submit_tool_outputs),
            },
            _ => Self::Other { kind: raw.kind },
        }
    }
}

/// One execution of a thread against an agent
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

impl Run {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    pub fn with_required_action(mut self, action: RequiredAction) -> Self {
        self.required_action = Some(action);
        self
    }

    pub fn with_last_error(mut self, error: RunError) -> Self {
        self.last_error = Some(error);
        self
    }
}

/// The caller's answer to one pending tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolApproval {
    pub tool_call_id: String,
    pub approve: bool,
    /// Side-channel headers forwarded to the tool server with the call
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ToolApproval {
    pub fn approve(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            approve: true,
            headers: HashMap::new(),
        }
    }

    pub fn deny(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            approve: false,
            headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Output of a locally executed function tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    #[serde(alias = "agent")]
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Honour width/alignment so transcripts can right-align roles
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFileContent {
    pub file_id: String,
}

/// One content item of a thread message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    ImageFile { image_file: ImageFileContent },
    #[serde(other)]
    Unsupported,
}

impl MessageContent {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            text: TextContent {
                value: value.into(),
            },
        }
    }

    pub fn image_file(file_id: impl Into<String>) -> Self {
        Self::ImageFile {
            image_file: ImageFileContent {
                file_id: file_id.into(),
            },
        }
    }
}

/// A message stored in a thread
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    pub role: MessageRole,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

/// Message posted to a thread or injected into a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Function tool schema advertised to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool made available to an agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentTool {
    CodeInterpreter,
    Mcp {
        server_label: String,
        server_url: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        allowed_tools: Vec<String>,
    },
    Function { function: FunctionDefinition },
}

/// Body of a create-agent request
#[derive(Debug, Clone, Serialize)]
pub struct CreateAgentRequest {
    pub model: String,
    pub name: String,
    pub instructions: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AgentTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: String,
}

/// Per-run settings for one remote tool server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpToolResource {
    pub server_label: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// `"always"` or `"never"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<String>,
}

impl McpToolResource {
    pub fn new(server_label: impl Into<String>) -> Self {
        Self {
            server_label: server_label.into(),
            headers: HashMap::new(),
            require_approval: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn require_approval(mut self, always: bool) -> Self {
        self.require_approval = Some(if always { "always" } else { "never" }.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolResources {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp: Vec<McpToolResource>,
}

/// Body of a create-run request
#[derive(Debug, Clone, Serialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_messages: Vec<NewMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_resources: Option<ToolResources>,
}

impl CreateRunRequest {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            additional_messages: Vec::new(),
            tool_resources: None,
        }
    }
}

/// Paged list envelope
#[derive(Debug, Deserialize)]
pub(crate) struct ListPage<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub last_id: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}
