#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use toolbridge_config::{ProcessConfig, ServerConfig, ServersConfig, TransportConfig};
use toolbridge_core::{BridgeError, Result};
use toolbridge_mcp::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
};
use toolbridge_mcp::{Connector, Transport};

/// How a scripted server behaves
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub tools: Vec<&'static str>,
    pub unreachable: bool,
    pub reject_handshake: bool,
    pub fail_list: bool,
    pub page_size: Option<usize>,
    pub call_error: Option<&'static str>,
    /// `(progress, total)` pairs sent before each call result
    pub progress: Vec<(f64, f64)>,
    /// Every `tools/list` page points at the same next cursor
    pub repeat_cursor: bool,
    /// Requests with this method are never answered
    pub hang_on: Option<&'static str>,
}

impl Script {
    pub fn with_tools(tools: &[&'static str]) -> Self {
        Self {
            tools: tools.to_vec(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub lists: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Connector that hands out in-memory servers keyed by configured name
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, (Script, Arc<Counters>)>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, name: &str, script: Script) -> Self {
        self.servers
            .insert(name.to_string(), (script, Arc::new(Counters::default())));
        self
    }

    pub fn counters(&self, name: &str) -> Arc<Counters> {
        Arc::clone(&self.servers[name].1)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Transport>> {
        let (script, counters) = self.servers.get(&config.name).ok_or_else(|| {
            BridgeError::ConnectionError {
                server: config.name.clone(),
                message: "no such fake server".into(),
            }
        })?;

        if script.unreachable {
            return Err(BridgeError::ConnectionError {
                server: config.name.clone(),
                message: "connection refused".into(),
            });
        }

        counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeServer {
            name: config.name.clone(),
            script: script.clone(),
            counters: Arc::clone(counters),
            outbox: VecDeque::new(),
            hanging: false,
            closed: false,
        }))
    }
}

/// Answers each request synchronously by queueing replies
#[derive(Debug)]
struct FakeServer {
    name: String,
    script: Script,
    counters: Arc<Counters>,
    outbox: VecDeque<JsonRpcMessage>,
    hanging: bool,
    closed: bool,
}

impl FakeServer {
    fn handle(&mut self, request: JsonRpcRequest) {
        if self.script.hang_on == Some(request.method.as_str()) {
            self.hanging = true;
            return;
        }
        let params = request.params.clone().unwrap_or(Value::Null);
        let reply = match request.method.as_str() {
            "initialize" if self.script.reject_handshake => {
                JsonRpcResponse::failure(request.id, -32603, "handshake refused")
            }
            "initialize" => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": self.name, "version": "1.0.0" }
                }),
            ),
            "tools/list" => {
                self.counters.lists.fetch_add(1, Ordering::SeqCst);
                if self.script.fail_list {
                    JsonRpcResponse::failure(request.id, -32603, "listing exploded")
                } else {
                    JsonRpcResponse::success(request.id, self.tools_page(&params))
                }
            }
            "tools/call" => {
                self.counters.calls.fetch_add(1, Ordering::SeqCst);
                let token = params["_meta"]["progressToken"].clone();
                for (progress, total) in self.script.progress.clone() {
                    self.outbox.push_back(
                        JsonRpcNotification::new(
                            "notifications/progress",
                            Some(json!({ "progressToken": token, "progress": progress, "total": total })),
                        )
                        .into(),
                    );
                }

                let tool = params["name"].as_str().unwrap_or_default();
                let result = match self.script.call_error {
                    Some(message) => json!({
                        "content": [{ "type": "text", "text": message }],
                        "isError": true
                    }),
                    None => json!({
                        "content": [{
                            "type": "text",
                            "text": format!("{}:{} {}", self.name, tool, params["arguments"])
                        }]
                    }),
                };
                JsonRpcResponse::success(request.id, result)
            }
            other => JsonRpcResponse::failure(request.id, METHOD_NOT_FOUND, format!("unknown method {}", other)),
        };
        self.outbox.push_back(reply.into());
    }

    fn tools_page(&self, params: &Value) -> Value {
        let start: usize = params["cursor"]
            .as_str()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let size = self.script.page_size.unwrap_or(self.script.tools.len().max(1));
        let end = (start + size).min(self.script.tools.len());

        let tools: Vec<Value> = self.script.tools[start..end]
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("{} from {}", name, self.name),
                    "inputSchema": { "type": "object", "properties": { "value": { "type": "string" } } }
                })
            })
            .collect();

        if self.script.repeat_cursor {
            json!({ "tools": tools, "nextCursor": "again" })
        } else if end < self.script.tools.len() {
            json!({ "tools": tools, "nextCursor": end.to_string() })
        } else {
            json!({ "tools": tools })
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<()> {
        if self.closed {
            return Err(BridgeError::ConnectionError {
                server: self.name.clone(),
                message: "closed".into(),
            });
        }
        if let JsonRpcMessage::Request(request) = message {
            self.handle(request);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>> {
        if self.hanging {
            std::future::pending::<()>().await;
        }
        Ok(self.outbox.pop_front())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    async fn close(&mut self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        Ok(())
    }
}

pub fn server_config(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        transport: TransportConfig::Process(ProcessConfig {
            command: "fake-mcp-server".into(),
            args: vec![],
            env: BTreeMap::new(),
            timeout: Duration::from_secs(5),
        }),
    }
}

pub fn servers(names: &[&str]) -> ServersConfig {
    names.iter().map(|name| server_config(name)).collect()
}
