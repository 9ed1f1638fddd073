//! Tools that can be offered to an agent or served over the stdio tool protocol
//!
//! Providers:
//! - `inventory`: seeded stock levels and weekly sales
//! - `lights`: in-memory light switches
//! - `github`: read-only GitHub REST queries

pub mod github;
pub mod inventory;
pub mod lights;

pub use github::github_tools;
pub use inventory::{inventory_tools, InventoryLevelsTool, WeeklySalesTool};
pub use lights::{light_tools, ChangeLightStateTool, GetLightsTool, Light, LightBoard};

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Result of executing a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// Successful result carrying a JSON-serialized value
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::success(serde_json::to_string(value)?))
    }
}

/// Name, description and input schema of a tool, as advertised to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Trait for tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<ToolResult>;

    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters(),
        }
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    tool_timeout_secs: u64,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            tool_timeout_secs: 60,
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    /// Set the default tool timeout (seconds)
    pub fn set_tool_timeout_secs(&mut self, secs: u64) {
        self.tool_timeout_secs = secs;
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool specs sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.to_spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute a tool by name with given parameters
    ///
    /// Unknown tools, timeouts and panics become error results rather than
    /// errors so a caller can hand them back to the model.
    pub async fn execute(&self, name: &str, params: Value) -> Result<ToolResult> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolResult::error(format!("Unknown tool: {}", name)));
        };

        tracing::debug!("Executing tool '{}' with {}", name, params);
        let timeout_duration = Duration::from_secs(self.tool_timeout_secs);

        match timeout(
            timeout_duration,
            AssertUnwindSafe(tool.execute(params)).catch_unwind(),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(panic_info)) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!("Tool '{}' panicked: {}", name, panic_msg);
                Ok(ToolResult::error(format!(
                    "Tool '{}' crashed: {}",
                    name, panic_msg
                )))
            }
            Err(_) => Ok(ToolResult::error(format!(
                "Tool '{}' timed out after {} seconds",
                name, self.tool_timeout_secs
            ))),
        }
    }
}

/// Read a required string parameter
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _params: Value) -> Result<ToolResult> {
            panic!("boom");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps longer than the registry allows"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _params: Value) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success("done"))
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let registry = ToolRegistry::new();
        let result = registry.execute("missing", json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickingTool));
        let result = registry.execute("explode", json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_error_result() {
        let mut registry = ToolRegistry::new();
        registry.set_tool_timeout_secs(0);
        registry.register(Arc::new(SlowTool));
        let result = registry.execute("slow", json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("timed out"));
    }

    #[test]
    fn test_specs_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register_all(inventory_tools());
        registry.register_all(light_tools(LightBoard::seeded()));
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "change_state",
                "get_inventory_levels",
                "get_lights",
                "get_weekly_sales"
            ]
        );
    }

    #[test]
    fn test_required_str() {
        let params = json!({ "repo": "agentloop" });
        assert_eq!(required_str(&params, "repo").unwrap(), "agentloop");
        assert!(required_str(&params, "organization").is_err());
    }
}
