//! SSE (Server-Sent Events) transport implementation for HTTP-based MCP servers
//!
//! The client opens a long-lived `GET` on the configured URL. The server first
//! sends an `endpoint` event naming the URL that accepts client messages, then
//! delivers every JSON-RPC message for this session as a `message` event.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use reqwest_eventsource::{Event, EventSource};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use toolbridge_config::NetworkConfig;
use toolbridge_core::{BridgeError, Result};
use tracing::{debug, error, info};

use super::Transport;
use crate::types::JsonRpcMessage;

/// SSE transport for HTTP-based MCP servers
pub struct SseTransport {
    server: String,
    url: Url,
    /// Discovered messages URL from the `endpoint` event
    endpoint: Url,
    client: reqwest::Client,
    timeout: Duration,
    incoming: mpsc::Receiver<JsonRpcMessage>,
    listener: ListenerTask,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("server", &self.server)
            .field("url", &self.url.as_str())
            .field("endpoint", &self.endpoint.as_str())
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

/// Event listener handle, aborted when dropped so an abandoned connect
/// attempt never leaves the stream open.
struct ListenerTask(Option<JoinHandle<()>>);

impl ListenerTask {
    fn abort(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.abort();
    }
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// messages endpoint
    pub async fn connect(server: &str, config: &NetworkConfig) -> Result<Self> {
        info!("Connecting to MCP server '{}' via SSE: {}", server, config.url);

        let connection_error = |message: String| BridgeError::ConnectionError {
            server: server.to_string(),
            message,
        };

        let url = Url::parse(&config.url)
            .map_err(|e| connection_error(format!("invalid url '{}': {}", config.url, e)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .default_headers(build_headers(&config.headers)?)
            .build()
            .map_err(|e| connection_error(format!("failed to build HTTP client: {}", e)))?;

        let request = client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream");
        let source = EventSource::new(request)
            .map_err(|e| connection_error(format!("failed to open event stream: {}", e)))?;

        let (message_tx, incoming) = mpsc::channel::<JsonRpcMessage>(100);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let mut listener = ListenerTask(Some(tokio::spawn(listen(
            server.to_string(),
            url.clone(),
            source,
            message_tx,
            endpoint_tx,
            connected.clone(),
        ))));

        let endpoint = match endpoint_rx.await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(message)) => {
                listener.abort();
                return Err(connection_error(message));
            }
            Err(_) => {
                listener.abort();
                return Err(connection_error(
                    "event stream ended before the server announced its endpoint".into(),
                ));
            }
        };

        Ok(Self {
            server: server.to_string(),
            url,
            endpoint,
            client,
            timeout: config.timeout,
            incoming,
            listener,
            connected,
        })
    }
}

async fn listen(
    server: String,
    base: Url,
    mut source: EventSource,
    messages: mpsc::Sender<JsonRpcMessage>,
    endpoint_tx: oneshot::Sender<std::result::Result<Url, String>>,
    connected: Arc<AtomicBool>,
) {
    let mut endpoint_tx = Some(endpoint_tx);

    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => {
                info!("SSE connection to '{}' opened", server);
                connected.store(true, Ordering::SeqCst);
            }
            Ok(Event::Message(msg)) => match msg.event.as_str() {
                "endpoint" => {
                    let resolved = resolve_endpoint(&base, &msg.data);
                    match &resolved {
                        Ok(url) => info!("Discovered messages endpoint for '{}': {}", server, url),
                        Err(e) => error!("Rejected endpoint from '{}': {}", server, e),
                    }
                    if let Some(sender) = endpoint_tx.take() {
                        let _ = sender.send(resolved);
                    }
                }
                "message" | "" => match JsonRpcMessage::parse(&msg.data) {
                    Ok(message) => {
                        if messages.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Unparseable SSE message from '{}': {} - {}", server, msg.data, e),
                },
                other => debug!("Ignoring SSE event '{}' from '{}'", other, server),
            },
            Err(e) => {
                error!("SSE stream error for '{}': {}", server, e);
                if let Some(sender) = endpoint_tx.take() {
                    let _ = sender.send(Err(e.to_string()));
                }
                break;
            }
        }
    }

    source.close();
    connected.store(false, Ordering::SeqCst);
    info!("SSE event listener for '{}' ended", server);
}

/// Resolve the `endpoint` event payload against the stream URL. The result
/// must stay on the same origin as the stream.
pub(crate) fn resolve_endpoint(base: &Url, data: &str) -> std::result::Result<Url, String> {
    let endpoint = base
        .join(data.trim())
        .map_err(|e| format!("invalid endpoint '{}': {}", data, e))?;

    if endpoint.origin() != base.origin() {
        return Err(format!(
            "endpoint origin does not match connection origin: {}",
            endpoint
        ));
    }
    Ok(endpoint)
}

fn post_error(server: &str, method: &str, timeout: Duration, e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::TimeoutError {
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        BridgeError::ConnectionError {
            server: server.to_string(),
            message: format!("failed to send HTTP request: {}", e),
        }
    }
}

fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| BridgeError::ConfigError(format!("Invalid header name '{}': {}", key, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            BridgeError::ConfigError(format!("Invalid header value for '{}': {}", key, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<()> {
        let method = match &message {
            JsonRpcMessage::Request(request) => request.method.clone(),
            JsonRpcMessage::Notification(notification) => notification.method.clone(),
            JsonRpcMessage::Response(_) => "response".to_string(),
        };
        let json = message.to_json()?;
        debug!("Sending message to {}: {}", self.endpoint, json);

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(json)
            .send()
            .await
            .map_err(|e| post_error(&self.server, &method, self.timeout, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::ProtocolError(format!(
                "MCP server '{}' rejected message with status {}: {}",
                self.server, status, body
            )));
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>> {
        Ok(self.incoming.recv().await)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        if self.listener.0.is_some() {
            info!("Closing SSE transport for MCP server '{}'", self.server);
        }
        self.listener.abort();
        self.incoming.close();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_endpoint() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        let endpoint = resolve_endpoint(&base, "/messages/?session_id=abc123").unwrap();
        assert_eq!(
            endpoint.as_str(),
            "http://localhost:8000/messages/?session_id=abc123"
        );
    }

    #[test]
    fn test_reject_cross_origin_endpoint() {
        let base = Url::parse("https://tools.example.com/mcp/sse").unwrap();
        assert!(resolve_endpoint(&base, "https://tools.example.com/messages").is_ok());
        assert!(resolve_endpoint(&base, "https://evil.example.net/messages").is_err());
        assert!(resolve_endpoint(&base, "http://tools.example.com/messages").is_err());
    }

    #[test]
    fn test_build_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer token123".to_string());
        let map = build_headers(&headers).unwrap();
        assert_eq!(map["authorization"], "Bearer token123");

        let mut bad = BTreeMap::new();
        bad.insert("Bad Header".to_string(), "x".to_string());
        assert!(matches!(build_headers(&bad), Err(BridgeError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_stalled_post_is_timeout_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _stall = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(200);
        let err = reqwest::Client::new()
            .post(format!("http://{}/messages", addr))
            .timeout(timeout)
            .body("{}")
            .send()
            .await
            .unwrap_err();

        let mapped = post_error("stalled", "tools/call", timeout, err);
        assert!(matches!(
            mapped,
            BridgeError::TimeoutError { ref method, timeout_ms: 200 } if method == "tools/call"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = NetworkConfig {
            url: "http://127.0.0.1:9/sse".to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(2),
        };

        let result =
            tokio::time::timeout(Duration::from_secs(10), SseTransport::connect("down", &config))
                .await
                .expect("connect should fail promptly");
        assert!(matches!(result, Err(BridgeError::ConnectionError { .. })));
    }
}
