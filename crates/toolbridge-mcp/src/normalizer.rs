//! Conversion of raw MCP results into the shapes the host consumes
//!
//! Tool descriptors become prompt-tool records; call results become a single
//! display string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ContentItem, ProgressEvent, ToolCallResult, ToolDescriptor};

/// Tool description as presented to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

/// Map a descriptor to the host's tool record, schema untouched.
pub fn to_prompt_tool(tool: &ToolDescriptor) -> PromptTool {
    PromptTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.input_schema.clone(),
    }
}

/// Render the tool list message returned by the list entry point
pub fn format_tool_list(tools: &[PromptTool]) -> String {
    let json = serde_json::to_string(tools).unwrap_or_else(|_| "[]".to_string());
    format!("MCP Server tools list: \n{}", json)
}

/// Flatten a call result into one display string
pub fn result_text(result: &ToolCallResult) -> String {
    if result.content.is_empty() {
        return match &result.structured_content {
            Some(structured) => structured.to_string(),
            None => String::new(),
        };
    }

    result
        .content
        .iter()
        .map(content_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn content_text(item: &ContentItem) -> String {
    match item {
        ContentItem::Text { text } => text.clone(),
        ContentItem::Image { mime_type, .. } => format!("[image: {}]", mime_type),
        ContentItem::Audio { mime_type, .. } => format!("[audio: {}]", mime_type),
        ContentItem::Resource { resource } => match resource.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => format!(
                "[resource: {}]",
                resource.get("uri").and_then(Value::as_str).unwrap_or("unknown")
            ),
        },
        ContentItem::ResourceLink { uri, .. } => format!("[resource: {}]", uri),
        ContentItem::Unsupported => "[unsupported content]".to_string(),
    }
}

/// `progress/total (pct%)`, dropping the percentage when it can't be computed
pub fn format_progress(event: &ProgressEvent) -> String {
    match event.total {
        Some(total) if total != 0.0 => format!(
            "{}/{} ({:.1}%)",
            event.progress,
            total,
            event.progress / total * 100.0
        ),
        Some(total) => format!("{}/{}", event.progress, total),
        None => format!("{}", event.progress),
    }
}

/// Some servers report progress inside the final structured payload
pub fn progress_from_payload(payload: &Value) -> Option<ProgressEvent> {
    let progress = payload.get("progress")?.as_f64()?;
    Some(ProgressEvent {
        progress,
        total: payload.get("total").and_then(Value::as_f64),
        message: payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(progress: f64, total: Option<f64>) -> ProgressEvent {
        ProgressEvent {
            progress,
            total,
            message: None,
        }
    }

    #[test]
    fn test_format_progress_percentage() {
        assert_eq!(format_progress(&event(3.0, Some(10.0))), "3/10 (30.0%)");
        assert_eq!(format_progress(&event(1.0, Some(3.0))), "1/3 (33.3%)");
        assert_eq!(format_progress(&event(2.5, Some(5.0))), "2.5/5 (50.0%)");
    }

    #[test]
    fn test_format_progress_without_usable_total() {
        let zero = format_progress(&event(3.0, Some(0.0)));
        assert_eq!(zero, "3/0");
        assert!(!zero.contains('%'));

        assert_eq!(format_progress(&event(7.0, None)), "7");
    }

    #[test]
    fn test_prompt_tool_preserves_schema_order() {
        let tool: ToolDescriptor = serde_json::from_str(
            r#"{
                "name": "search",
                "description": "Search the index",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "zeta": {"type": "string", "description": "last alphabetically"},
                        "alpha": {"type": "integer"},
                        "mid": {"type": "boolean"}
                    },
                    "required": ["zeta"]
                }
            }"#,
        )
        .unwrap();

        let prompt = to_prompt_tool(&tool);
        assert_eq!(prompt.name, "search");
        assert_eq!(prompt.description.as_deref(), Some("Search the index"));
        assert_eq!(prompt.parameters, tool.input_schema);

        let keys: Vec<&String> = prompt.parameters["properties"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_missing_description_serializes_as_null() {
        let tool = ToolDescriptor {
            name: "ping".into(),
            description: None,
            input_schema: json!({"type": "object"}),
        };
        let rendered = format_tool_list(&[to_prompt_tool(&tool)]);
        assert_eq!(
            rendered,
            "MCP Server tools list: \n[{\"name\":\"ping\",\"description\":null,\"parameters\":{\"type\":\"object\"}}]"
        );
    }

    #[test]
    fn test_result_text_mixed_content() {
        let result = ToolCallResult {
            content: vec![
                ContentItem::Text {
                    text: "Line 1".into(),
                },
                ContentItem::Image {
                    data: "base64data".into(),
                    mime_type: "image/png".into(),
                },
                ContentItem::Resource {
                    resource: json!({"uri": "file:///notes.txt", "text": "notes"}),
                },
                ContentItem::Resource {
                    resource: json!({"uri": "file:///blob.bin", "blob": "AAAA"}),
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            result_text(&result),
            "Line 1\n[image: image/png]\nnotes\n[resource: file:///blob.bin]"
        );
    }

    #[test]
    fn test_result_text_structured_only() {
        let result = ToolCallResult {
            structured_content: Some(json!({"temperature": 21})),
            ..Default::default()
        };
        assert_eq!(result_text(&result), "{\"temperature\":21}");
    }

    #[test]
    fn test_progress_from_payload() {
        let parsed = progress_from_payload(&json!({"progress": 3, "total": 10})).unwrap();
        assert_eq!(format_progress(&parsed), "3/10 (30.0%)");
        assert!(progress_from_payload(&json!({"result": "done"})).is_none());
    }
}
