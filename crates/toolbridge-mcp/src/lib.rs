//! MCP (Model Context Protocol) client bridge
//!
//! Opens a session per server, performs the handshake, lists and calls tools,
//! and always closes what it opened. `Orchestrator` is the entry point hosts
//! use; the lower layers are public for hosts that manage clients directly.

pub mod client;
pub mod normalizer;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{ClientState, ServerClient};
pub use normalizer::{format_progress, format_tool_list, result_text, to_prompt_tool, PromptTool};
pub use orchestrator::{FetchMode, Orchestrator};
pub use progress::{LogProgressSink, ProgressSink};
pub use session::TransportSession;
pub use transport::{Connector, DefaultConnector, SseTransport, StdioTransport, Transport};
pub use types::{ContentItem, ProgressEvent, ServerTool, ToolCallResult, ToolDescriptor};
