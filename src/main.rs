use agentloop_cli::config::{EnvConfig, Settings};
use agentloop_cli::transport::cli::{self as commands, ApprovalMode, GitHubQuery, RemoteToolsArgs, Toolset};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agentloop")]
#[command(author, version, about = "Drive hosted agent runs with tool-call approval", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// File of KEY=value connection settings
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Settings file (default: <config dir>/agentloop/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a code-interpreter agent a question and print the transcript
    Basic {
        /// Question to ask
        #[arg(short, long)]
        question: Option<String>,

        /// Poll interval in milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval_ms: Option<u64>,

        /// Keep the agent and thread after the run
        #[arg(long)]
        keep: bool,
    },

    /// Run an agent backed by a remote tool server, gating each tool call
    RemoteTools {
        /// Tools the agent may use on the remote server
        #[arg(long = "allow-tool", default_value = "search_azure_rest_api_code")]
        allow_tools: Vec<String>,

        /// How tool calls are approved
        #[arg(long, value_enum, default_value = "auto")]
        approval: ApprovalMode,

        /// Glob patterns approved in allow-list mode (default: --allow-tool)
        #[arg(long = "approve")]
        approve_patterns: Vec<String>,

        /// Header sent to the tool server with each approval (KEY=VALUE)
        #[arg(long = "header", value_parser = commands::parse_header, default_value = "SuperSecret=123456")]
        headers: Vec<(String, String)>,

        /// Prompt for the agent
        #[arg(short, long)]
        prompt: Option<String>,

        /// Poll interval in milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval_ms: Option<u64>,

        /// Keep the agent and thread after the run
        #[arg(long)]
        keep: bool,
    },

    /// Serve tool providers over stdin/stdout
    ServeTools {
        /// Toolsets to expose
        #[arg(long, value_enum, value_delimiter = ',', default_values = ["inventory", "lights"])]
        toolset: Vec<Toolset>,
    },

    /// Chat with a model that can call a tool server's tools
    Chat {
        /// Tool server command line (default: this binary's serve-tools)
        #[arg(short, long)]
        server: Option<String>,

        /// System prompt
        #[arg(long)]
        system: Option<String>,
    },

    /// Query GitHub directly
    Github {
        #[command(subcommand)]
        query: GitHubQuery,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "agentloop_cli=debug,agentloop=debug"
    } else {
        "agentloop_cli=info,agentloop=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let env = EnvConfig::load(&cli.env_file)?;
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Basic {
            question,
            poll_interval_ms,
            keep,
        } => {
            commands::run_basic(
                &env,
                &settings,
                question,
                poll_interval_ms.map(Duration::from_millis),
                keep,
            )
            .await?;
        }
        Commands::RemoteTools {
            allow_tools,
            approval,
            approve_patterns,
            headers,
            prompt,
            poll_interval_ms,
            keep,
        } => {
            let args = RemoteToolsArgs {
                allow_tools,
                approval,
                approve_patterns,
                headers,
                prompt,
                poll_interval: poll_interval_ms.map(Duration::from_millis),
                keep,
            };
            commands::run_remote_tools(&env, &settings, args).await?;
        }
        Commands::ServeTools { toolset } => {
            tracing::info!("Serving toolsets {:?} on stdio", toolset);
            commands::run_serve_tools(&toolset, &env, &settings).await?;
        }
        Commands::Chat { server, system } => {
            commands::run_chat(&env, &settings, server, system).await?;
        }
        Commands::Github { query } => {
            commands::run_github(&env, query).await?;
        }
    }

    Ok(())
}
