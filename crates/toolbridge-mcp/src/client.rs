//! MCP client implementation

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use toolbridge_config::ServerConfig;
use toolbridge_core::{BridgeError, Result};
use tracing::{debug, info, warn};

use crate::progress::ProgressSink;
use crate::session::TransportSession;
use crate::transport::Connector;
use crate::types::{
    CallToolResult, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcResponse, ListToolsResult, ProgressEvent, RequestMeta, ToolCallParams,
    ToolCallResult, ToolDescriptor, INVALID_PARAMS, LATEST_PROTOCOL_VERSION, METHOD_NOT_FOUND,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Where a client is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    Initializing,
    Ready,
    Closed,
    Failed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::New => "new",
            ClientState::Initializing => "initializing",
            ClientState::Ready => "ready",
            ClientState::Closed => "closed",
            ClientState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// MCP client for communicating with one MCP server
pub struct ServerClient {
    config: Arc<ServerConfig>,
    connector: Arc<dyn Connector>,
    progress: Arc<dyn ProgressSink>,

    /// Present from a successful open until cleanup
    session: Option<TransportSession>,

    state: ClientState,

    /// Set after initialization
    server_info: Option<InitializeResult>,

    /// Tools from the last successful `list_tools`
    tools_cache: Option<Vec<ToolDescriptor>>,
}

impl fmt::Debug for ServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerClient")
            .field("server", &self.config.name)
            .field("state", &self.state)
            .finish()
    }
}

impl ServerClient {
    pub fn new(
        config: Arc<ServerConfig>,
        connector: Arc<dyn Connector>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            config,
            connector,
            progress,
            session: None,
            state: ClientState::New,
            server_info: None,
            tools_cache: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Open the transport and perform the MCP handshake
    pub async fn initialize(&mut self) -> Result<&InitializeResult> {
        if self.state != ClientState::New {
            return Err(BridgeError::InitializationError {
                server: self.config.name.clone(),
                message: format!("cannot initialize a client in state '{}'", self.state),
            });
        }

        info!("Initializing MCP client: {}", self.config.name);
        self.state = ClientState::Initializing;

        match self.handshake().await {
            Ok(result) => {
                self.state = ClientState::Ready;
                Ok(&*self.server_info.insert(result))
            }
            Err(e) => {
                self.state = ClientState::Failed;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<InitializeResult> {
        let session = TransportSession::open(self.connector.as_ref(), &self.config).await?;
        // Stored before the handshake so cleanup closes it on every path
        let session = self.session.insert(session);

        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        };

        let response = session
            .send_request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        let init_error = |message: String| BridgeError::InitializationError {
            server: self.config.name.clone(),
            message,
        };

        if let Some(error) = response.error {
            return Err(init_error(format!("server rejected handshake: {}", error.message)));
        }

        let result: InitializeResult = response
            .result
            .ok_or_else(|| init_error("initialize response missing result".into()))
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| init_error(format!("malformed initialize result: {}", e)))
            })?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(init_error(format!(
                "unsupported protocol version: {}",
                result.protocol_version
            )));
        }

        session.notify("notifications/initialized", None).await?;

        info!(
            "MCP client '{}' initialized with protocol version: {}",
            self.config.name, result.protocol_version
        );
        if let Some(ref server_info) = result.server_info {
            info!(
                "Connected to MCP server: {} v{}",
                server_info.name, server_info.version
            );
        }

        Ok(result)
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        debug!("Listing tools from MCP server: {}", self.config.name);

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let params = cursor
                .take()
                .map(|cursor| serde_json::json!({ "cursor": cursor }));
            let response = self.request("tools/list", params).await?;

            if let Some(error) = response.error {
                return Err(BridgeError::ProtocolError(format!(
                    "Failed to list tools from '{}': {}",
                    self.config.name, error.message
                )));
            }

            let page: ListToolsResult = parse_result(&self.config.name, "tools/list", response.result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(BridgeError::ProtocolError(format!(
                            "MCP server '{}' repeated tools/list cursor '{}'",
                            self.config.name, next
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        info!(
            "Discovered {} tools from MCP server '{}'",
            tools.len(),
            self.config.name
        );

        self.tools_cache = Some(tools.clone());
        Ok(tools)
    }

    /// Call a tool on the MCP server, forwarding progress as it arrives
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.ensure_ready()?;

        if let Some(tools) = &self.tools_cache {
            if !tools.iter().any(|tool| tool.name == name) {
                return Err(BridgeError::ToolNotFound(name.to_string()));
            }
        }

        debug!("Calling MCP tool '{}' on server '{}'", name, self.config.name);

        let session = self.session_mut()?;
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
            meta: Some(RequestMeta {
                progress_token: session.peek_next_id(),
            }),
        };

        let server = self.config.name.clone();
        let sink = Arc::clone(&self.progress);
        let mut observed = Vec::new();
        let mut on_progress = |event: ProgressEvent| {
            sink.on_progress(&server, name, &event);
            observed.push(event);
        };

        let outcome = match self.session.as_mut() {
            Some(session) => {
                session
                    .send_request_with_progress(
                        "tools/call",
                        Some(serde_json::to_value(params)?),
                        &mut on_progress,
                    )
                    .await
            }
            None => unreachable_session(&server),
        };
        let response = self.track_failure(outcome)?;

        if let Some(error) = response.error {
            return Err(tool_error(name, &error));
        }

        let result: CallToolResult = parse_result(&server, "tools/call", response.result)?;
        let result = ToolCallResult {
            content: result.content,
            structured_content: result.structured_content,
            progress: observed,
        }
        .checked(name, result.is_error.unwrap_or(false))?;

        Ok(result)
    }

    /// Release the transport. Safe in any state and on repeated calls.
    pub async fn cleanup(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing MCP client: {}", self.config.name);
            session.close().await;
        }
        self.state = ClientState::Closed;
    }

    /// Check if the client holds a live session
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        self.ensure_ready()?;
        let outcome = self.session_mut()?.send_request(method, params).await;
        self.track_failure(outcome)
    }

    fn track_failure<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(ref e) = outcome {
            if e.is_transport_failure() {
                warn!("MCP client '{}' failed: {}", self.config.name, e);
                self.state = ClientState::Failed;
            }
        }
        outcome
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == ClientState::Ready {
            Ok(())
        } else {
            Err(BridgeError::NotReady {
                server: self.config.name.clone(),
                state: self.state.to_string(),
            })
        }
    }

    fn session_mut(&mut self) -> Result<&mut TransportSession> {
        match self.session.as_mut() {
            Some(session) => Ok(session),
            None => unreachable_session(&self.config.name),
        }
    }
}

impl Drop for ServerClient {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(
                "MCP client '{}' dropped without cleanup; releasing transport",
                self.config.name
            );
        }
    }
}

impl ToolCallResult {
    fn checked(self, tool: &str, is_error: bool) -> Result<Self> {
        if !is_error {
            return Ok(self);
        }
        let message = crate::normalizer::result_text(&self);
        Err(BridgeError::ToolExecutionError {
            tool: tool.to_string(),
            message: if message.is_empty() {
                "tool reported an error".to_string()
            } else {
                message
            },
        })
    }
}

fn unreachable_session<T>(server: &str) -> Result<T> {
    Err(BridgeError::NotReady {
        server: server.to_string(),
        state: "no session".into(),
    })
}

fn parse_result<T: serde::de::DeserializeOwned>(
    server: &str,
    method: &str,
    result: Option<Value>,
) -> Result<T> {
    let value = result.ok_or_else(|| {
        BridgeError::ProtocolError(format!("'{}' response from '{}' missing result", method, server))
    })?;
    serde_json::from_value(value).map_err(|e| {
        BridgeError::ProtocolError(format!(
            "malformed '{}' response from '{}': {}",
            method, server, e
        ))
    })
}

fn tool_error(tool: &str, error: &JsonRpcError) -> BridgeError {
    let rejects_name = matches!(error.code, METHOD_NOT_FOUND | INVALID_PARAMS)
        && is_unknown_tool_message(tool, &error.message);
    if rejects_name {
        BridgeError::ToolNotFound(tool.to_string())
    } else {
        BridgeError::ToolExecutionError {
            tool: tool.to_string(),
            message: error.message.clone(),
        }
    }
}

fn is_unknown_tool_message(tool: &str, message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    let names_missing_tool = lower.contains("unknown tool")
        || lower.contains("tool not found")
        || (lower.contains("tool") && lower.contains("not found"));
    names_missing_tool && message.contains(tool)
}
