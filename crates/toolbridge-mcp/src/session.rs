//! Request/response exchange over one transport.

use serde_json::{json, Value};
use std::time::Duration;
use toolbridge_config::ServerConfig;
use toolbridge_core::{BridgeError, Result};
use tracing::{debug, info, warn};

use crate::transport::{Connector, Transport};
use crate::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProgressEvent,
    ProgressParams, RequestId, METHOD_NOT_FOUND,
};

/// One open connection to one MCP server.
#[derive(Debug)]
pub struct TransportSession {
    server: String,
    transport: Box<dyn Transport>,
    next_id: i64,
    timeout: Duration,
    closed: bool,
}

impl TransportSession {
    /// Open a transport for `config`, bounded by the server's timeout.
    pub async fn open(connector: &dyn Connector, config: &ServerConfig) -> Result<Self> {
        let timeout = config.timeout();
        let transport = tokio::time::timeout(timeout, connector.connect(config))
            .await
            .map_err(|_| BridgeError::TimeoutError {
                method: "connect".into(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        Ok(Self::new(config.name.clone(), transport, timeout))
    }

    pub fn new(server: impl Into<String>, transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            transport,
            next_id: 1,
            timeout,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Id the next request will carry
    pub fn peek_next_id(&self) -> RequestId {
        RequestId::Number(self.next_id)
    }

    /// Send a request and wait for its response.
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        self.send_request_with_progress(method, params, &mut |_: ProgressEvent| {})
            .await
    }

    /// Send a request and wait for its response, handing every progress
    /// notification for this request to `on_progress` as it arrives.
    pub async fn send_request_with_progress(
        &mut self,
        method: &str,
        params: Option<Value>,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) -> Result<JsonRpcResponse> {
        if self.closed {
            return Err(BridgeError::ConnectionError {
                server: self.server.clone(),
                message: "session already closed".into(),
            });
        }
        if !self.transport.is_connected() {
            return Err(BridgeError::ConnectionError {
                server: self.server.clone(),
                message: format!("transport disconnected before '{}'", method),
            });
        }

        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        let timeout = self.timeout;
        let request = JsonRpcRequest::new(id.clone(), method, params);

        tokio::time::timeout(timeout, self.exchange(request, on_progress))
            .await
            .map_err(|_| BridgeError::TimeoutError {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send(notification.into()).await
    }

    async fn exchange(
        &mut self,
        request: JsonRpcRequest,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) -> Result<JsonRpcResponse> {
        let id = request.id.clone();
        let method = request.method.clone();
        debug!("Sending '{}' (id {}) to MCP server '{}'", method, id, self.server);
        self.transport.send(request.into()).await?;

        loop {
            let message = self.transport.receive().await?.ok_or_else(|| {
                BridgeError::ConnectionError {
                    server: self.server.clone(),
                    message: format!("connection closed while waiting for '{}' response", method),
                }
            })?;

            match message {
                JsonRpcMessage::Response(response) if response.id == id => return Ok(response),
                JsonRpcMessage::Response(response) => {
                    warn!(
                        "Received response for different request: {} (expected: {})",
                        response.id, id
                    );
                }
                JsonRpcMessage::Notification(notification) => {
                    self.dispatch_notification(&id, notification, on_progress);
                }
                JsonRpcMessage::Request(request) => {
                    self.answer_server_request(request).await?;
                }
            }
        }
    }

    fn dispatch_notification(
        &self,
        in_flight: &RequestId,
        notification: JsonRpcNotification,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) {
        if notification.method != "notifications/progress" {
            debug!(
                "Notification '{}' from MCP server '{}'",
                notification.method, self.server
            );
            return;
        }

        let params = notification.params.unwrap_or(Value::Null);
        match serde_json::from_value::<ProgressParams>(params) {
            Ok(progress) if &progress.progress_token == in_flight => on_progress(progress.into()),
            Ok(progress) => debug!(
                "Progress for unknown token {} from MCP server '{}'",
                progress.progress_token, self.server
            ),
            Err(e) => warn!("Malformed progress notification from '{}': {}", self.server, e),
        }
    }

    async fn answer_server_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let response = if request.method == "ping" {
            JsonRpcResponse::success(request.id, json!({}))
        } else {
            debug!(
                "Declining server request '{}' from MCP server '{}'",
                request.method, self.server
            );
            JsonRpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not supported by client: {}", request.method),
            )
        };
        self.transport.send(response.into()).await
    }

    /// Close the transport. Repeated calls are no-ops and close errors are
    /// logged rather than returned.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match self.transport.close().await {
            Ok(()) => info!("Closed session with MCP server '{}'", self.server),
            Err(e) => warn!("Error closing MCP session '{}': {}", self.server, e),
        }
    }
}
