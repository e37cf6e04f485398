//! Protocol-neutral views of tool listings and tool results.
//!
//! Both are read from the MCP wire shape (`inputSchema`, `isError`,
//! `structuredContent`) so they stay stable across protocol crate releases.

use serde_json::{json, Value};

/// A tool advertised by a tool server.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl RemoteTool {
    pub fn from_wire(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_string();
        let description = value.get("description").and_then(Value::as_str).map(str::to_owned);
        let input_schema = value
            .get("inputSchema")
            .cloned()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));

        Some(Self { name, description, input_schema })
    }
}

/// Flattened result of one tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallOutput {
    pub text: String,
    pub is_error: bool,
    pub structured: Option<Value>,
}

impl ToolCallOutput {
    pub fn from_wire(value: &Value) -> Self {
        let is_error = value.get("isError").and_then(Value::as_bool).unwrap_or(false);
        let structured = value.get("structuredContent").cloned().filter(|content| !content.is_null());

        let parts = value
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(content_text).collect::<Vec<_>>())
            .unwrap_or_default();

        let text = match (parts.len(), &structured) {
            (0, Some(structured)) => structured.to_string(),
            (1, _) => parts.into_iter().next().unwrap_or_default(),
            _ => Value::Array(parts.into_iter().map(Value::String).collect()).to_string(),
        };

        Self { text, is_error, structured }
    }
}

fn content_text(item: &Value) -> String {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => item.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        Some("resource") => item
            .get("resource")
            .and_then(|resource| resource.get("text"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| item.to_string()),
        _ => item.to_string(),
    }
}
