//! GitHub query tools.

use super::{required_str, Tool, ToolResult};
use crate::github::{GitHubClient, IssueQuery};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

fn repo_properties() -> serde_json::Map<String, Value> {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "organization".to_string(),
        json!({ "type": "string", "description": "the name of the organization" }),
    );
    properties.insert(
        "repo".to_string(),
        json!({ "type": "string", "description": "the name of the repo" }),
    );
    properties
}

pub struct UserProfileTool {
    client: Arc<GitHubClient>,
}

#[async_trait]
impl Tool for UserProfileTool {
    fn name(&self) -> &str {
        "get_user_profile"
    }

    fn description(&self) -> &str {
        "Get the profile of the authenticated GitHub user"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value) -> Result<ToolResult> {
        ToolResult::json(&self.client.get_user_profile().await?)
    }
}

pub struct RepositoryTool {
    client: Arc<GitHubClient>,
}

#[async_trait]
impl Tool for RepositoryTool {
    fn name(&self) -> &str {
        "get_repository"
    }

    fn description(&self) -> &str {
        "Get the information of one specific repository in one specific organization"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": repo_properties(),
            "required": ["organization", "repo"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let organization = required_str(&params, "organization")?;
        let repo = required_str(&params, "repo")?;
        ToolResult::json(&self.client.get_repository(organization, repo).await?)
    }
}

pub struct IssuesTool {
    client: Arc<GitHubClient>,
}

#[async_trait]
impl Tool for IssuesTool {
    fn name(&self) -> &str {
        "get_issues"
    }

    fn description(&self) -> &str {
        "Get the issues of one specific repository in one specific organization"
    }

    fn parameters(&self) -> Value {
        let mut properties = repo_properties();
        properties.insert(
            "max_results".to_string(),
            json!({ "type": "integer", "description": "the number of issues returned in the response. Default count is 30" }),
        );
        properties.insert(
            "state".to_string(),
            json!({ "type": "string", "description": "the status of the issue. It can be open, closed, or all" }),
        );
        properties.insert(
            "label".to_string(),
            json!({ "type": "string", "description": "the label of the issue" }),
        );
        properties.insert(
            "assignee".to_string(),
            json!({ "type": "string", "description": "the assignee of the issue" }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": ["organization", "repo"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let organization = required_str(&params, "organization")?;
        let repo = required_str(&params, "repo")?;
        let text = |key: &str| params.get(key).and_then(|v| v.as_str()).map(String::from);
        let query = IssueQuery {
            max_results: params
                .get("max_results")
                .and_then(|v| v.as_u64())
                .map(|n| n.min(100) as u32),
            state: text("state"),
            label: text("label"),
            assignee: text("assignee"),
        };
        ToolResult::json(&self.client.get_issues(organization, repo, &query).await?)
    }
}

pub struct IssueDetailTool {
    client: Arc<GitHubClient>,
}

#[async_trait]
impl Tool for IssueDetailTool {
    fn name(&self) -> &str {
        "get_issue_detail"
    }

    fn description(&self) -> &str {
        "Get the detail information of one specific issue of one specific repository in one specific organization"
    }

    fn parameters(&self) -> Value {
        let mut properties = repo_properties();
        properties.insert(
            "issue_id".to_string(),
            json!({ "type": "integer", "description": "the id of the issue" }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": ["organization", "repo", "issue_id"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let organization = required_str(&params, "organization")?;
        let repo = required_str(&params, "repo")?;
        let issue_id = params
            .get("issue_id")
            .and_then(|v| v.as_u64())
            .context("Missing required parameter: issue_id")?;
        ToolResult::json(
            &self
                .client
                .get_issue_detail(organization, repo, issue_id)
                .await?,
        )
    }
}

pub fn github_tools(client: Arc<GitHubClient>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(UserProfileTool {
            client: client.clone(),
        }),
        Arc::new(RepositoryTool {
            client: client.clone(),
        }),
        Arc::new(IssuesTool {
            client: client.clone(),
        }),
        Arc::new(IssueDetailTool { client }),
    ]
}
