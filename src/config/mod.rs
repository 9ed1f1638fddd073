//! Configuration management for agentloop
//!
//! Connection settings come from the process environment, optionally
//! seeded from a `.env` file of `KEY=value` lines. Tuning knobs live in an
//! optional TOML file under the user config directory.

use crate::agents::Credential;
use crate::github::{GitHubSettings, DEFAULT_BASE_URL};
use crate::runloop::{RetryPolicy, RunLoopOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PROJECT_ENDPOINT: &str = "PROJECT_ENDPOINT";
pub const MODEL_DEPLOYMENT_NAME: &str = "MODEL_DEPLOYMENT_NAME";
pub const MODEL_DEPLOYMENT_ENDPOINT: &str = "MODEL_DEPLOYMENT_ENDPOINT";
pub const API_KEY: &str = "API_KEY";
pub const AGENTS_TOKEN: &str = "AGENTS_TOKEN";
pub const MCP_SERVER_URL: &str = "MCP_SERVER_URL";
pub const MCP_SERVER_LABEL: &str = "MCP_SERVER_LABEL";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const GITHUB_BASE_URL: &str = "GITHUB_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0} (set it in the environment or .env)")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Process environment layered over values from a `.env` file.
///
/// Real environment variables win over the file.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    file_vars: HashMap<String, String>,
}

impl EnvConfig {
    /// Environment only
    pub fn from_process() -> Self {
        Self::default()
    }

    /// Environment plus `path` if it exists
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No env file at {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_vars = parse_env_file(&content);
        tracing::debug!("Loaded {} settings from {}", file_vars.len(), path.display());
        Ok(Self { file_vars })
    }

    pub fn with_vars(file_vars: HashMap<String, String>) -> Self {
        Self { file_vars }
    }

    /// Look a key up; empty values count as unset
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.file_vars.get(key).cloned())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    pub fn project_endpoint(&self) -> Result<String, ConfigError> {
        let endpoint = self.require(PROJECT_ENDPOINT)?;
        validate_url(PROJECT_ENDPOINT, &endpoint)?;
        Ok(endpoint)
    }

    pub fn model_deployment(&self) -> Result<String, ConfigError> {
        self.require(MODEL_DEPLOYMENT_NAME)
    }

    pub fn model_endpoint(&self) -> Result<String, ConfigError> {
        let endpoint = self.require(MODEL_DEPLOYMENT_ENDPOINT)?;
        validate_url(MODEL_DEPLOYMENT_ENDPOINT, &endpoint)?;
        Ok(endpoint)
    }

    /// API key takes precedence over a bearer token
    pub fn credential(&self) -> Credential {
        if let Some(key) = self.get(API_KEY) {
            Credential::ApiKey(key)
        } else if let Some(token) = self.get(AGENTS_TOKEN) {
            Credential::Bearer(token)
        } else {
            tracing::warn!("Neither {} nor {} is set; sending unauthenticated requests", API_KEY, AGENTS_TOKEN);
            Credential::Anonymous
        }
    }

    /// Label and URL of the remote tool server
    pub fn mcp_server(&self) -> Result<(String, String), ConfigError> {
        let label = self.require(MCP_SERVER_LABEL)?;
        let url = self.require(MCP_SERVER_URL)?;
        validate_url(MCP_SERVER_URL, &url)?;
        Ok((label, url))
    }

    pub fn github(&self) -> Result<GitHubSettings, ConfigError> {
        let base_url = self
            .get(GITHUB_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        validate_url(GITHUB_BASE_URL, &base_url)?;
        Ok(GitHubSettings {
            base_url,
            token: self.get(GITHUB_TOKEN),
        })
    }
}

fn validate_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}

/// Parse `KEY=value` lines; `#` comments, blank lines and an optional
/// `export ` prefix are ignored, matching quotes are stripped.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!("Ignoring malformed env line {}", lineno + 1);
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Tuning settings from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub run_loop: RunLoopConfig,
    pub chat: ChatConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunLoopConfig {
    pub poll_interval_ms: u64,
    pub max_polls: Option<u32>,
    pub deadline_secs: Option<u64>,
    /// Retries per poll for transient errors (0 = fail immediately)
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_polls: None,
            deadline_secs: None,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

impl RunLoopConfig {
    pub fn to_options(&self) -> RunLoopOptions {
        RunLoopOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
            deadline: self.deadline_secs.map(Duration::from_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum model round-trips per prompt
    pub max_iterations: usize,
    pub api_version: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            api_version: crate::llm::DEFAULT_CHAT_API_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub call_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load from the default location, or defaults when there is no file
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Reject values the run loop cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_loop.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "run_loop.poll_interval_ms",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// `<config dir>/agentloop/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "agentloop")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
