//! Read-only GitHub REST client
//!
//! SECURITY: the token is only sent to the configured base URL.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub public_repos: Option<u32>,
    #[serde(default)]
    pub followers: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: Issue,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub closed_at: Option<String>,
}

/// Filters for listing issues; empty values are left out of the query
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    pub max_results: Option<u32>,
    pub state: Option<String>,
    pub label: Option<String>,
    pub assignee: Option<String>,
}

impl IssueQuery {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let mut push = |key: &'static str, value: Option<&str>| {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                pairs.push((key, value.to_string()));
            }
        };
        push("state", self.state.as_deref());
        push("assignee", self.assignee.as_deref());
        push("labels", self.label.as_deref());
        let per_page = self.max_results.map(|n| n.to_string());
        push("per_page", per_page.as_deref());
        pairs
    }
}

pub struct GitHubClient {
    client: reqwest::Client,
    settings: GitHubSettings,
}

impl GitHubClient {
    pub fn new(settings: GitHubSettings) -> Result<Self> {
        url::Url::parse(&settings.base_url)
            .with_context(|| format!("Invalid GitHub base URL: {}", settings.base_url))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("agentloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, settings })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), path);
        tracing::info!("GitHub request: {}", path);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .query(query);
        if let Some(token) = &self.settings.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request failed: {}", operation))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {} in {}: {}", status, operation, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Unexpected response shape: {}", operation))
    }

    pub async fn get_user_profile(&self) -> Result<User> {
        self.get("get_user_profile", "/user", &[]).await
    }

    pub async fn get_repository(&self, organization: &str, repo: &str) -> Result<Repo> {
        let path = format!("/repos/{}/{}", organization, repo);
        self.get("get_repository", &path, &[]).await
    }

    pub async fn get_issues(
        &self,
        organization: &str,
        repo: &str,
        query: &IssueQuery,
    ) -> Result<Vec<Issue>> {
        let path = format!("/repos/{}/{}/issues", organization, repo);
        self.get("get_issues", &path, &query.to_pairs()).await
    }

    pub async fn get_issue_detail(
        &self,
        organization: &str,
        repo: &str,
        issue_id: u64,
    ) -> Result<IssueDetail> {
        let path = format!("/repos/{}/{}/issues/{}", organization, repo, issue_id);
        self.get("get_issue_detail", &path, &[]).await
    }
}
