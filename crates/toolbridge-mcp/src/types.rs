//! MCP protocol types and JSON-RPC message structures

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use toolbridge_core::{BridgeError, Result};

/// Protocol version sent in the `initialize` request
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Versions this client can talk to
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// JSON-RPC error code for an unknown method
pub const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC error code for invalid params
pub const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC request id; servers echo whatever form the client sent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message travelling over a transport
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value by the fields it carries.
    pub fn from_value(value: Value) -> Result<Self> {
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());

        let message = match (has_method, has_id) {
            (true, true) => JsonRpcMessage::Request(serde_json::from_value(value)?),
            (true, false) => JsonRpcMessage::Notification(serde_json::from_value(value)?),
            (false, true) => JsonRpcMessage::Response(serde_json::from_value(value)?),
            (false, false) => {
                return Err(BridgeError::ProtocolError(
                    "JSON-RPC message has neither 'method' nor 'id'".into(),
                ))
            }
        };
        Ok(message)
    }

    /// Decode one line or SSE data payload.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(response)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(notification)
    }
}

/// Server capabilities advertised during initialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

/// Client capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

/// Client information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "toolbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Initialize response result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Tool definition advertised by an MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// One page of `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Tool call parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub progress_token: RequestId,
}

/// `tools/call` result as sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Content item in tool results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    ResourceLink {
        uri: String,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

/// Parameters of `notifications/progress`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: RequestId,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A progress update observed while a tool call was in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ProgressParams> for ProgressEvent {
    fn from(params: ProgressParams) -> Self {
        Self {
            progress: params.progress,
            total: params.total,
            message: params.message,
        }
    }
}

/// Final outcome of a successful tool call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    pub structured_content: Option<Value>,
    /// Progress observed before the result arrived, in arrival order
    pub progress: Vec<ProgressEvent>,
}

/// A tool together with the server that advertised it
#[derive(Debug, Clone, PartialEq)]
pub struct ServerTool {
    pub server: String,
    pub tool: ToolDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest::new(
            RequestId::Number(7),
            "initialize",
            Some(json!({ "protocolVersion": LATEST_PROTOCOL_VERSION })),
        );

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"method\":\"initialize\""));
    }

    #[test]
    fn test_message_classification() {
        let response = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert!(matches!(response, JsonRpcMessage::Response(ref r) if r.id == RequestId::Number(3)));

        let progress = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":3,"progress":1}}"#,
        )
        .unwrap();
        assert!(matches!(progress, JsonRpcMessage::Notification(_)));

        let ping = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#).unwrap();
        assert!(matches!(ping, JsonRpcMessage::Request(ref r) if r.id == RequestId::String("srv-1".into())));

        assert!(JsonRpcMessage::parse(r#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(JsonRpcMessage::parse("not json").is_err());
    }

    #[test]
    fn test_tool_descriptor_without_description() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "read_file",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }
        }))
        .unwrap();

        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.description, None);
        assert_eq!(tool.input_schema["required"], json!(["path"]));
    }

    #[test]
    fn test_content_item_variants() {
        let items: Vec<ContentItem> = serde_json::from_value(json!([
            { "type": "text", "text": "Hello, world!" },
            { "type": "image", "data": "base64data", "mimeType": "image/png" },
            { "type": "resource", "resource": { "uri": "file:///a.txt", "text": "a" } },
            { "type": "something_new", "payload": 1 }
        ]))
        .unwrap();

        assert_eq!(
            items[0],
            ContentItem::Text {
                text: "Hello, world!".into()
            }
        );
        assert!(matches!(items[1], ContentItem::Image { ref mime_type, .. } if mime_type == "image/png"));
        assert!(matches!(items[2], ContentItem::Resource { .. }));
        assert_eq!(items[3], ContentItem::Unsupported);
    }

    #[test]
    fn test_tool_call_params_carry_progress_token() {
        let params = ToolCallParams {
            name: "slow".into(),
            arguments: json!({}),
            meta: Some(RequestMeta {
                progress_token: RequestId::Number(4),
            }),
        };
        let value = serde_json::to_value(params).unwrap();
        assert_eq!(value["_meta"]["progressToken"], json!(4));
    }
}
