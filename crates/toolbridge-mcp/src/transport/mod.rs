//! Transport layer for MCP communication
//!
//! Provides transport abstractions for MCP communication with support for:
//! - Stdio (process-based) transport
//! - SSE (Server-Sent Events) transport

use async_trait::async_trait;
use std::fmt::Debug;
use toolbridge_config::{ServerConfig, TransportConfig};
use toolbridge_core::Result;

use crate::types::JsonRpcMessage;

pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Raw message pipe to one MCP server
#[async_trait]
pub trait Transport: Send + Debug {
    /// Send one JSON-RPC message
    async fn send(&mut self, message: JsonRpcMessage) -> Result<()>;

    /// Wait for the next message; `None` once the server side has gone away
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>>;

    /// Check if transport is connected
    fn is_connected(&self) -> bool;

    /// Release the process or stream. Must tolerate repeated calls.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports for configured servers
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Transport>>;
}

/// Connector backed by real subprocesses and HTTP streams
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Transport>> {
        match &config.transport {
            TransportConfig::Process(process) => {
                let transport = StdioTransport::spawn(&config.name, process).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::Network(network) => {
                let transport = SseTransport::connect(&config.name, network).await?;
                Ok(Box::new(transport))
            }
        }
    }
}
