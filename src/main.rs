use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use toolbridge_config::ServersConfig;
use toolbridge_core::BridgeError;
use toolbridge_mcp::{format_tool_list, to_prompt_tool, FetchMode, Orchestrator, PromptTool};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Discover and call tools on MCP servers over stdio or SSE", long_about = None)]
struct Cli {
    /// servers_config file (JSON or YAML)
    #[arg(short, long, value_name = "FILE", conflicts_with = "servers_json")]
    config: Option<PathBuf>,

    /// servers_config as inline JSON text
    #[arg(long, value_name = "JSON")]
    servers_json: Option<String>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tools from every configured server
    Tools {
        /// Query servers concurrently
        #[arg(long, action = clap::ArgAction::SetTrue)]
        concurrent: bool,
    },

    /// Execute a tool on the first server that provides it
    Call {
        /// Tool name
        #[arg(short, long)]
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        arguments: String,
    },

    /// Check that every configured server can be reached and listed
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Tools { concurrent } => {
            match load_servers(cli.config, cli.servers_json) {
                Ok(servers) => list_tools(servers, concurrent).await,
                Err(e) => println!("Error listing MCP Server tools: {e}"),
            }
        }
        Commands::Call { tool, arguments } => {
            let servers = load_servers(cli.config, cli.servers_json)?;
            call_tool(servers, &tool, &arguments).await?;
        }
        Commands::Validate => {
            let servers = load_servers(cli.config, cli.servers_json)?;
            validate(servers).await?;
        }
    }

    Ok(())
}

fn load_servers(config: Option<PathBuf>, servers_json: Option<String>) -> Result<ServersConfig> {
    let servers = match (config, servers_json) {
        (Some(path), _) => {
            info!("Loading servers_config from: {:?}", path);
            ServersConfig::from_file(&path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        (None, Some(text)) => ServersConfig::from_json_str(&text)?,
        (None, None) => bail!("Please fill in the servers_config (use --config or --servers-json)"),
    };
    info!("Configured {} MCP servers", servers.len());
    Ok(servers)
}

async fn list_tools(servers: ServersConfig, concurrent: bool) {
    let orchestrator = Orchestrator::new(servers).with_concurrent_fetch(concurrent);

    match orchestrator.fetch_tools(FetchMode::BestEffort).await {
        Ok(tools) => {
            let prompt_tools: Vec<PromptTool> = tools.iter().map(|t| to_prompt_tool(&t.tool)).collect();
            println!("{}", format_tool_list(&prompt_tools));
        }
        Err(e) => println!("Error listing MCP Server tools: {e}"),
    }
}

async fn call_tool(servers: ServersConfig, tool: &str, arguments: &str) -> Result<()> {
    let arguments: Value = serde_json::from_str(arguments).context("--arguments must be valid JSON")?;
    if !arguments.is_object() {
        bail!("--arguments must be a JSON object");
    }

    let orchestrator = Orchestrator::new(servers);
    match orchestrator.execute_tool(tool, arguments).await {
        Ok(text) => println!("{text}"),
        Err(e @ BridgeError::ToolNotFound(_)) => println!("Error executing tool: {e}"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn validate(servers: ServersConfig) -> Result<()> {
    let names = servers.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(", ");
    Orchestrator::new(servers)
        .validate()
        .await
        .context("MCP server validation failed")?;

    println!("All MCP servers reachable: {names}");
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
