use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to connect to MCP server '{server}': {message}")]
    ConnectionError { server: String, message: String },

    #[error("MCP server '{server}' initialization failed: {message}")]
    InitializationError { server: String, message: String },

    #[error("MCP protocol error: {0}")]
    ProtocolError(String),

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    TimeoutError { method: String, timeout_ms: u64 },

    #[error("Tool '{0}' not found on any configured MCP server")]
    ToolNotFound(String),

    #[error("Tool execution failed for '{tool}': {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("MCP client '{server}' is not ready (state: {state})")]
    NotReady { server: String, state: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BridgeError {
    /// Errors after which the underlying transport can no longer be trusted.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionError { .. }
                | BridgeError::TimeoutError { .. }
                | BridgeError::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
