//! Fan-out of list/execute operations across configured MCP servers
//!
//! Every top-level call builds fresh clients, visits servers in configured
//! order and closes each client before touching the next one. Nothing is
//! pooled between calls.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use toolbridge_config::{ServerConfig, ServersConfig};
use toolbridge_core::{BridgeError, Result};
use tracing::{debug, error, info};

use crate::client::ServerClient;
use crate::normalizer::{format_progress, progress_from_payload, result_text};
use crate::progress::{LogProgressSink, ProgressSink};
use crate::transport::{Connector, DefaultConnector};
use crate::types::{ServerTool, ToolCallResult, ToolDescriptor};

/// How `fetch_tools` treats a failing server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Log the failure and continue with zero tools from that server
    BestEffort,
    /// Abort on the first failure (credential validation)
    Strict,
}

/// Result of scanning one server for a tool during execution
enum Scan {
    /// The server does not advertise the tool
    Absent,
    /// The server advertised the tool; this is its call outcome
    Claimed(Result<ToolCallResult>),
}

pub struct Orchestrator {
    servers: Vec<Arc<ServerConfig>>,
    connector: Arc<dyn Connector>,
    progress: Arc<dyn ProgressSink>,
    concurrent_fetch: bool,
}

impl Orchestrator {
    pub fn new(servers: ServersConfig) -> Self {
        Self {
            servers: servers.into_iter().map(Arc::new).collect(),
            connector: Arc::new(DefaultConnector),
            progress: Arc::new(LogProgressSink),
            concurrent_fetch: false,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Visit servers concurrently in `fetch_tools`. Output order and
    /// per-client cleanup are unchanged.
    pub fn with_concurrent_fetch(mut self, enabled: bool) -> Self {
        self.concurrent_fetch = enabled;
        self
    }

    fn client_for(&self, config: &Arc<ServerConfig>) -> ServerClient {
        ServerClient::new(
            Arc::clone(config),
            Arc::clone(&self.connector),
            Arc::clone(&self.progress),
        )
    }

    /// Collect tools from every server, in configured order
    pub async fn fetch_tools(&self, mode: FetchMode) -> Result<Vec<ServerTool>> {
        info!(
            "Fetching tools from {} MCP servers ({:?})",
            self.servers.len(),
            mode
        );

        let outcomes: Vec<(Arc<ServerConfig>, Result<Vec<ToolDescriptor>>)> = if self.concurrent_fetch {
            join_all(self.servers.iter().map(|config| async move {
                (Arc::clone(config), self.discover_server(config).await)
            }))
            .await
        } else {
            let mut outcomes = Vec::with_capacity(self.servers.len());
            for config in &self.servers {
                let outcome = self.discover_server(config).await;
                let failed = outcome.is_err();
                outcomes.push((Arc::clone(config), outcome));
                if failed && mode == FetchMode::Strict {
                    break;
                }
            }
            outcomes
        };

        let mut all_tools = Vec::new();
        for (config, outcome) in outcomes {
            match outcome {
                Ok(tools) => all_tools.extend(tools.into_iter().map(|tool| ServerTool {
                    server: config.name.clone(),
                    tool,
                })),
                Err(e) if mode == FetchMode::Strict => {
                    error!("MCP server '{}' failed validation: {}", config.name, e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Error initializing or listing tools for '{}': {}", config.name, e);
                }
            }
        }

        info!("Fetched {} tools in total", all_tools.len());
        Ok(all_tools)
    }

    /// Strict fetch used to validate credentials; any server failure fails
    /// the whole check
    pub async fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(BridgeError::ConfigError(
                "servers_config does not define any enabled MCP server".into(),
            ));
        }
        self.fetch_tools(FetchMode::Strict).await.map(|_| ())
    }

    /// Run `name` on the first server, in configured order, that advertises it
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.run_on_first_claimant(name, arguments)
            .await
            .unwrap_or_else(|| Err(BridgeError::ToolNotFound(name.to_string())))
    }

    /// Host-facing execution: always yields text once a server claims the
    /// tool; only an unclaimed tool is an error
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<String> {
        match self.run_on_first_claimant(name, arguments).await {
            None => Err(BridgeError::ToolNotFound(name.to_string())),
            Some(Ok(result)) => {
                if let Some(event) = result.structured_content.as_ref().and_then(progress_from_payload) {
                    info!("Progress: {}", format_progress(&event));
                }
                Ok(format!("Tool execution result: {}", result_text(&result)))
            }
            Some(Err(e)) => {
                let message = format!("Error executing tool: {}", e);
                error!("{}", message);
                Ok(message)
            }
        }
    }

    /// `None` when no server advertises `name`
    async fn run_on_first_claimant(&self, name: &str, arguments: Value) -> Option<Result<ToolCallResult>> {
        for config in &self.servers {
            match self.scan_server(config, name, arguments.clone()).await {
                Ok(Scan::Claimed(outcome)) => return Some(outcome),
                Ok(Scan::Absent) => {
                    debug!("MCP server '{}' does not provide '{}'", config.name, name);
                }
                Err(e) => {
                    error!("Error initializing or listing tools for '{}': {}", config.name, e);
                }
            }
        }
        None
    }

    async fn discover_server(&self, config: &Arc<ServerConfig>) -> Result<Vec<ToolDescriptor>> {
        let mut client = self.client_for(config);
        let outcome = discover(&mut client).await;
        client.cleanup().await;
        outcome
    }

    async fn scan_server(&self, config: &Arc<ServerConfig>, name: &str, arguments: Value) -> Result<Scan> {
        let mut client = self.client_for(config);
        let outcome = scan(&mut client, name, arguments).await;
        client.cleanup().await;
        outcome
    }
}

async fn discover(client: &mut ServerClient) -> Result<Vec<ToolDescriptor>> {
    client.initialize().await?;
    client.list_tools().await
}

async fn scan(client: &mut ServerClient, name: &str, arguments: Value) -> Result<Scan> {
    client.initialize().await?;
    let tools = client.list_tools().await?;
    if !tools.iter().any(|tool| tool.name == name) {
        return Ok(Scan::Absent);
    }

    info!("Executing tool '{}' on MCP server '{}'", name, client.name());
    let outcome = match client.call_tool(name, arguments).await {
        Err(BridgeError::ToolNotFound(tool)) => Err(BridgeError::ToolExecutionError {
            message: format!("MCP server '{}' listed the tool but rejected it as unknown", client.name()),
            tool,
        }),
        other => other,
    };
    Ok(Scan::Claimed(outcome))
}
