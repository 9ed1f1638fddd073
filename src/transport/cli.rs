//! CLI transport for the demo flows
//!
//! Transcripts go to stdout; everything diagnostic goes through `tracing`
//! to stderr.

use crate::agents::{
    AgentService, AgentTool, AgentsClient, CreateAgentRequest, CreateRunRequest, McpToolResource,
    MessageContent, NewMessage, RunService, RunStatus, ThreadMessage, ToolResources,
};
use crate::config::{EnvConfig, Settings};
use crate::github::{GitHubClient, IssueQuery};
use crate::llm::{AzureOpenAiChat, ChatSession};
use crate::mcp::{wrap_server_tools, McpClient, ToolServer, ToolServerCommand};
use crate::runloop::{
    AllowListPolicy, ApprovalPolicy, AutoApprove, PromptPolicy, RunLoopDriver, RunLoopOptions,
    RunOutcome,
};
use crate::tools::{github_tools, inventory_tools, light_tools, LightBoard, ToolRegistry};
use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

/// Poll interval of the basic demo
pub const BASIC_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub const BASIC_QUESTION: &str = "What is the impedance formula?";
pub const REMOTE_TOOLS_PROMPT: &str = "Please summarize the Azure REST API specifications Readme";

/// How pending tool calls are decided in `remote-tools`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ApprovalMode {
    /// Approve everything (demonstration only)
    Auto,
    /// Approve tools matching `--approve` patterns, deny the rest
    AllowList,
    /// Ask on the terminal
    Prompt,
}

/// Tool providers that `serve-tools` can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Toolset {
    Inventory,
    Lights,
    Github,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum GitHubQuery {
    /// Profile of the authenticated user
    User,
    /// Repository details
    Repo { organization: String, repo: String },
    /// List issues of a repository
    Issues {
        organization: String,
        repo: String,
        #[arg(long)]
        max_results: Option<u32>,
        /// open, closed or all
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
    },
    /// One issue with body and comment count
    Issue {
        organization: String,
        repo: String,
        issue_id: u64,
    },
}

/// Parse a `KEY=VALUE` command-line header
pub fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Format one transcript entry: a header, then each content item on its own line
pub fn format_message(message: &ThreadMessage) -> String {
    let mut out = format!(
        "{} - {:>10}: ",
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        message.role
    );
    let items: Vec<String> = message
        .content
        .iter()
        .filter_map(|item| match item {
            MessageContent::Text { text } => Some(text.value.clone()),
            MessageContent::ImageFile { image_file } => {
                Some(format!("<image from ID: {}>", image_file.file_id))
            }
            MessageContent::Unsupported => None,
        })
        .collect();
    out.push_str(&items.join("\n"));
    out
}

pub fn print_transcript(out: &mut impl Write, messages: &[ThreadMessage]) -> io::Result<()> {
    for message in messages {
        writeln!(out, "{}", format_message(message))?;
    }
    Ok(())
}

/// Everything needed to hold one conversation with a hosted agent
#[derive(Debug, Clone)]
pub struct Conversation {
    pub agent: CreateAgentRequest,
    pub prompt: String,
    pub additional_messages: Vec<NewMessage>,
    pub tool_resources: Option<ToolResources>,
    /// Keep the agent and thread instead of deleting them afterwards
    pub keep: bool,
}

#[derive(Debug)]
pub struct ConversationResult {
    pub outcome: RunOutcome,
    pub messages: Vec<ThreadMessage>,
}

/// Create agent and thread, post the prompt, drive the run to completion
/// and collect the transcript. Cleanup runs even when the run fails.
pub async fn run_conversation<S>(
    service: Arc<S>,
    conversation: Conversation,
    policy: Arc<dyn ApprovalPolicy>,
    options: RunLoopOptions,
) -> Result<ConversationResult>
where
    S: AgentService + 'static,
{
    let agent = service
        .create_agent(&conversation.agent)
        .await
        .context("Failed to create agent")?;
    tracing::info!("Created agent {}", agent.id);

    let thread = match service.create_thread().await {
        Ok(thread) => thread,
        Err(e) => {
            cleanup(service.as_ref(), &agent.id, None, conversation.keep).await;
            return Err(anyhow::Error::new(e).context("Failed to create thread"));
        }
    };
    tracing::info!("Created thread {}", thread.id);

    let result = drive_thread(service.clone(), &agent.id, &thread.id, &conversation, policy, options).await;
    cleanup(service.as_ref(), &agent.id, Some(&thread.id), conversation.keep).await;
    result
}

async fn drive_thread<S>(
    service: Arc<S>,
    agent_id: &str,
    thread_id: &str,
    conversation: &Conversation,
    policy: Arc<dyn ApprovalPolicy>,
    options: RunLoopOptions,
) -> Result<ConversationResult>
where
    S: AgentService + 'static,
{
    service
        .create_message(thread_id, &NewMessage::user(&conversation.prompt))
        .await
        .context("Failed to post message")?;

    let mut request = CreateRunRequest::new(agent_id);
    request.additional_messages = conversation.additional_messages.clone();
    request.tool_resources = conversation.tool_resources.clone();
    let run = service
        .create_run(thread_id, &request)
        .await
        .context("Failed to create run")?;

    let run_service: Arc<dyn RunService> = service.clone();
    let outcome = RunLoopDriver::new(run_service, policy)
        .with_options(options)
        .drive(run)
        .await?;
    if outcome.run.status != RunStatus::Completed {
        tracing::warn!("Run {} ended as {}", outcome.run.id, outcome.run.status);
    }

    let mut messages = service
        .list_messages(thread_id)
        .await
        .context("Failed to list messages")?;
    crate::agents::ensure_chronological(&mut messages);
    Ok(ConversationResult { outcome, messages })
}

async fn cleanup<S: AgentService + ?Sized>(
    service: &S,
    agent_id: &str,
    thread_id: Option<&str>,
    keep: bool,
) {
    if keep {
        tracing::info!(
            "Keeping agent {}{}",
            agent_id,
            thread_id.map(|t| format!(" and thread {}", t)).unwrap_or_default()
        );
        return;
    }
    if let Some(thread_id) = thread_id {
        if let Err(e) = service.delete_thread(thread_id).await {
            tracing::warn!("Failed to delete thread {}: {}", thread_id, e);
        }
    }
    if let Err(e) = service.delete_agent(agent_id).await {
        tracing::warn!("Failed to delete agent {}: {}", agent_id, e);
    }
}

fn agents_client(env: &EnvConfig) -> Result<Arc<AgentsClient>> {
    let endpoint = env.project_endpoint()?;
    Ok(Arc::new(AgentsClient::new(&endpoint, env.credential())?))
}

fn print_result(result: &ConversationResult) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_transcript(&mut out, &result.messages)?;
    out.flush()?;
    Ok(())
}

/// Code-interpreter tutor with a seeded conversation
pub async fn run_basic(
    env: &EnvConfig,
    settings: &Settings,
    question: Option<String>,
    poll_interval: Option<Duration>,
    keep: bool,
) -> Result<()> {
    let service = agents_client(env)?;
    let question = question.unwrap_or_else(|| BASIC_QUESTION.to_string());

    let conversation = Conversation {
        agent: CreateAgentRequest {
            model: env.model_deployment()?,
            name: "Math Tutor".to_string(),
            instructions:
                "You are a personal electronics tutor. Write and run code to answer questions."
                    .to_string(),
            tools: vec![AgentTool::CodeInterpreter],
        },
        prompt: question.clone(),
        additional_messages: vec![NewMessage::assistant("E=mc^2"), NewMessage::user(question)],
        tool_resources: None,
        keep,
    };

    let mut options = settings.run_loop.to_options();
    options.poll_interval = poll_interval.unwrap_or(BASIC_POLL_INTERVAL);

    // Nothing in this flow needs approval; deny anything unexpected.
    let policy = Arc::new(AllowListPolicy::new(&[], HashMap::new())?);
    let result = run_conversation(service, conversation, policy, options).await?;
    print_result(&result)
}

pub struct RemoteToolsArgs {
    pub allow_tools: Vec<String>,
    pub approval: ApprovalMode,
    /// Patterns for `ApprovalMode::AllowList`; defaults to `allow_tools`
    pub approve_patterns: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub prompt: Option<String>,
    pub poll_interval: Option<Duration>,
    pub keep: bool,
}

pub fn approval_policy(
    mode: ApprovalMode,
    patterns: &[String],
    headers: HashMap<String, String>,
) -> Result<Arc<dyn ApprovalPolicy>> {
    Ok(match mode {
        ApprovalMode::Auto => Arc::new(AutoApprove::new(headers)),
        ApprovalMode::AllowList => Arc::new(AllowListPolicy::new(patterns, headers)?),
        ApprovalMode::Prompt => Arc::new(PromptPolicy::stdin(headers)),
    })
}

/// Agent backed by a remote tool server, with approval gating
pub async fn run_remote_tools(
    env: &EnvConfig,
    settings: &Settings,
    args: RemoteToolsArgs,
) -> Result<()> {
    let service = agents_client(env)?;
    let (label, url) = env.mcp_server()?;
    let headers: HashMap<String, String> = args.headers.into_iter().collect();

    let mut resource = McpToolResource::new(&label);
    for (key, value) in &headers {
        resource = resource.with_header(key, value);
    }

    let conversation = Conversation {
        agent: CreateAgentRequest {
            model: env.model_deployment()?,
            name: "my-mcp-agent".to_string(),
            instructions: "You are a helpful agent that can use MCP tools to assist users. \
                Use the available MCP tools to answer questions and perform tasks."
                .to_string(),
            tools: vec![AgentTool::Mcp {
                server_label: label,
                server_url: url,
                allowed_tools: args.allow_tools.clone(),
            }],
        },
        prompt: args
            .prompt
            .unwrap_or_else(|| REMOTE_TOOLS_PROMPT.to_string()),
        additional_messages: Vec::new(),
        tool_resources: Some(ToolResources {
            mcp: vec![resource],
        }),
        keep: args.keep,
    };

    let patterns = if args.approve_patterns.is_empty() {
        args.allow_tools
    } else {
        args.approve_patterns
    };
    let policy = approval_policy(args.approval, &patterns, headers)?;

    let mut options = settings.run_loop.to_options();
    if let Some(interval) = args.poll_interval {
        options.poll_interval = interval;
    }

    let result = run_conversation(service, conversation, policy, options).await?;
    tracing::info!(
        "Run finished after {} polls and {} submissions ({} approved, {} denied)",
        result.outcome.polls,
        result.outcome.submissions,
        result.outcome.decisions.iter().filter(|d| d.approve).count(),
        result.outcome.decisions.iter().filter(|d| !d.approve).count()
    );
    print_result(&result)
}

/// Build a registry with the requested toolsets
pub fn build_registry(
    toolsets: &[Toolset],
    env: &EnvConfig,
    settings: &Settings,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.set_tool_timeout_secs(settings.tools.call_timeout_secs);

    let mut seen = Vec::new();
    for toolset in toolsets {
        if seen.contains(toolset) {
            continue;
        }
        seen.push(*toolset);
        match toolset {
            Toolset::Inventory => registry.register_all(inventory_tools()),
            Toolset::Lights => registry.register_all(light_tools(LightBoard::seeded())),
            Toolset::Github => {
                let client = GitHubClient::new(env.github()?)?;
                registry.register_all(github_tools(Arc::new(client)));
            }
        }
    }
    Ok(registry)
}

/// Serve toolsets over stdin/stdout until stdin closes
pub async fn run_serve_tools(
    toolsets: &[Toolset],
    env: &EnvConfig,
    settings: &Settings,
) -> Result<()> {
    let registry = build_registry(toolsets, env, settings)?;
    let server = ToolServer::new("agentloop-tools", Arc::new(registry));
    server
        .serve(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
}

/// Command that starts this binary's own tool server
pub fn self_server_command() -> Result<ToolServerCommand> {
    let exe = std::env::current_exe().context("Failed to locate the agentloop executable")?;
    Ok(ToolServerCommand {
        name: "agentloop-tools".to_string(),
        command: exe.to_string_lossy().into_owned(),
        args: vec!["serve-tools".to_string()],
        env: HashMap::new(),
    })
}

/// Interactive chat whose tools come from a spawned tool server
pub async fn run_chat(
    env: &EnvConfig,
    settings: &Settings,
    server: Option<String>,
    system_prompt: Option<String>,
) -> Result<()> {
    let command = match server {
        Some(line) => ToolServerCommand::parse("tool-server", &line)
            .context("Tool server command must not be empty")?,
        None => self_server_command()?,
    };

    let client = Arc::new(
        McpClient::connect(&command)
            .await
            .with_context(|| format!("Failed to start tool server '{}'", command.command))?,
    );
    let tools = wrap_server_tools(client.clone(), Some(settings.tools.call_timeout_secs)).await?;

    let mut registry = ToolRegistry::new();
    registry.set_tool_timeout_secs(settings.tools.call_timeout_secs);
    registry.register_all(tools);
    let registry = Arc::new(registry);

    println!("Available tools:");
    for spec in registry.specs() {
        println!("{}: {}", spec.name.bold(), spec.description);
    }
    println!();

    let model = AzureOpenAiChat::new(
        &env.model_endpoint()?,
        &env.model_deployment()?,
        env.credential(),
    )?
    .with_api_version(&settings.chat.api_version);

    let mut session = ChatSession::new(Arc::new(model), registry)
        .with_max_iterations(settings.chat.max_iterations);
    if let Some(prompt) = system_prompt {
        session = session.with_system_prompt(prompt);
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Prompt: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }

        match session.send(prompt).await {
            Ok(answer) => println!("{}\n", answer),
            Err(e) => eprintln!("{} {:#}\n", "Error:".red(), e),
        }
    }

    if let Err(e) = client.close().await {
        tracing::debug!("Tool server shutdown: {}", e);
    }
    Ok(())
}

/// Query GitHub directly and print JSON
pub async fn run_github(env: &EnvConfig, query: GitHubQuery) -> Result<()> {
    let client = GitHubClient::new(env.github()?)?;
    let value = match query {
        GitHubQuery::User => serde_json::to_value(client.get_user_profile().await?)?,
        GitHubQuery::Repo { organization, repo } => {
            serde_json::to_value(client.get_repository(&organization, &repo).await?)?
        }
        GitHubQuery::Issues {
            organization,
            repo,
            max_results,
            state,
            label,
            assignee,
        } => {
            let query = IssueQuery {
                max_results,
                state,
                label,
                assignee,
            };
            serde_json::to_value(client.get_issues(&organization, &repo, &query).await?)?
        }
        GitHubQuery::Issue {
            organization,
            repo,
            issue_id,
        } => serde_json::to_value(
            client
                .get_issue_detail(&organization, &repo, issue_id)
                .await?,
        )?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{
        Agent, AgentError, MessageRole, RequiredAction, Run, Thread, ToolApproval,
        ToolCallRequest, ToolOutput,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn message(role: MessageRole, content: Vec<MessageContent>) -> ThreadMessage {
        ThreadMessage {
            id: "msg_1".to_string(),
            created_at: chrono::Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap(),
            role,
            content,
        }
    }

    #[test]
    fn test_format_text_message() {
        let line = format_message(&message(
            MessageRole::User,
            vec![MessageContent::text("What is the impedance formula?")],
        ));
        assert_eq!(
            line,
            "2025-03-04 05:06:07 -       user: What is the impedance formula?"
        );
    }

    #[test]
    fn test_format_image_and_text_items() {
        let line = format_message(&message(
            MessageRole::Assistant,
            vec![
                MessageContent::text("Here is a plot"),
                MessageContent::image_file("file_42"),
            ],
        ));
        assert_eq!(
            line,
            "2025-03-04 05:06:07 -  assistant: Here is a plot\n<image from ID: file_42>"
        );
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("SuperSecret=123456").unwrap(),
            ("SuperSecret".to_string(), "123456".to_string())
        );
        assert_eq!(parse_header("a=b=c").unwrap().1, "b=c");
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=x").is_err());
    }

    #[test]
    fn test_build_registry_deduplicates_toolsets() {
        let env = EnvConfig::with_vars(HashMap::new());
        let registry = build_registry(
            &[Toolset::Inventory, Toolset::Lights, Toolset::Inventory],
            &env,
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(registry.len(), 4);
    }

    /// In-memory agent service: one approval round, then completion
    #[derive(Default)]
    struct FakeService {
        log: Mutex<Vec<String>>,
        approvals: Mutex<Vec<ToolApproval>>,
        fail_run: bool,
    }

    impl FakeService {
        fn record(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }
    }

    #[async_trait]
    impl RunService for FakeService {
        async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AgentError> {
            self.record("get_run");
            Ok(Run::new(run_id, thread_id, RunStatus::Completed))
        }

        async fn submit_tool_approvals(
            &self,
            thread_id: &str,
            run_id: &str,
            approvals: &[ToolApproval],
        ) -> Result<Run, AgentError> {
            self.record("submit_tool_approvals");
            self.approvals.lock().unwrap().extend_from_slice(approvals);
            Ok(Run::new(run_id, thread_id, RunStatus::InProgress))
        }

        async fn submit_tool_outputs(
            &self,
            _thread_id: &str,
            _run_id: &str,
            _outputs: &[ToolOutput],
        ) -> Result<Run, AgentError> {
            unreachable!("no function tools in this flow")
        }
    }

    #[async_trait]
    impl AgentService for FakeService {
        async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, AgentError> {
            self.record(format!("create_agent {}", request.name));
            Ok(Agent {
                id: "asst_1".to_string(),
                name: Some(request.name.clone()),
                model: request.model.clone(),
            })
        }

        async fn delete_agent(&self, agent_id: &str) -> Result<(), AgentError> {
            self.record(format!("delete_agent {}", agent_id));
            Ok(())
        }

        async fn create_thread(&self) -> Result<Thread, AgentError> {
            self.record("create_thread");
            Ok(Thread {
                id: "thread_1".to_string(),
            })
        }

        async fn delete_thread(&self, thread_id: &str) -> Result<(), AgentError> {
            self.record(format!("delete_thread {}", thread_id));
            Ok(())
        }

        async fn create_message(
            &self,
            _thread_id: &str,
            message: &NewMessage,
        ) -> Result<ThreadMessage, AgentError> {
            self.record("create_message");
            Ok(self::message(
                message.role,
                vec![MessageContent::text(&message.content)],
            ))
        }

        async fn create_run(
            &self,
            thread_id: &str,
            _request: &CreateRunRequest,
        ) -> Result<Run, AgentError> {
            self.record("create_run");
            if self.fail_run {
                return Err(AgentError::BadRequest("unknown model".to_string()));
            }
            Ok(Run::new("run_1", thread_id, RunStatus::RequiresAction).with_required_action(
                RequiredAction::SubmitToolApproval {
                    tool_calls: vec![ToolCallRequest::new(
                        "call_1",
                        "search_azure_rest_api_code",
                        "{}",
                    )],
                },
            ))
        }

        async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, AgentError> {
            self.record("list_messages");
            Ok(vec![message(
                MessageRole::Assistant,
                vec![MessageContent::text("Summary")],
            )])
        }
    }

    fn conversation(keep: bool) -> Conversation {
        Conversation {
            agent: CreateAgentRequest {
                model: "gpt-4o".to_string(),
                name: "my-mcp-agent".to_string(),
                instructions: "Use tools".to_string(),
                tools: Vec::new(),
            },
            prompt: REMOTE_TOOLS_PROMPT.to_string(),
            additional_messages: Vec::new(),
            tool_resources: None,
            keep,
        }
    }

    fn fast_options() -> RunLoopOptions {
        RunLoopOptions {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_conversation_approves_and_cleans_up() {
        let service = Arc::new(FakeService::default());
        let headers = HashMap::from([("SuperSecret".to_string(), "123456".to_string())]);
        let policy = approval_policy(ApprovalMode::Auto, &[], headers).unwrap();

        let result = run_conversation(service.clone(), conversation(false), policy, fast_options())
            .await
            .unwrap();

        assert_eq!(result.outcome.submissions, 1);
        assert_eq!(result.messages.len(), 1);
        let approvals = service.approvals.lock().unwrap();
        assert_eq!(approvals[0].tool_call_id, "call_1");
        assert_eq!(approvals[0].headers["SuperSecret"], "123456");

        let log = service.log.lock().unwrap();
        assert_eq!(log.last().unwrap(), "delete_agent asst_1");
        assert!(log.contains(&"delete_thread thread_1".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_failure_unless_kept() {
        let service = Arc::new(FakeService {
            fail_run: true,
            ..Default::default()
        });
        let policy = approval_policy(ApprovalMode::AllowList, &[], HashMap::new()).unwrap();
        let err = run_conversation(service.clone(), conversation(false), policy, fast_options())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create run"));
        assert!(service
            .log
            .lock()
            .unwrap()
            .contains(&"delete_agent asst_1".to_string()));

        let kept = Arc::new(FakeService::default());
        let policy = approval_policy(ApprovalMode::Auto, &[], HashMap::new()).unwrap();
        run_conversation(kept.clone(), conversation(true), policy, fast_options())
            .await
            .unwrap();
        assert!(!kept
            .log
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.starts_with("delete_")));
    }

    #[tokio::test]
    async fn test_allow_list_denies_unlisted_tool() {
        let service = Arc::new(FakeService::default());
        let policy = approval_policy(
            ApprovalMode::AllowList,
            &["get_*".to_string()],
            HashMap::new(),
        )
        .unwrap();
        let result = run_conversation(service.clone(), conversation(false), policy, fast_options())
            .await
            .unwrap();
        assert!(!result.outcome.decisions[0].approve);
    }
}
