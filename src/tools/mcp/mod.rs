//! Remote tool sources over MCP (JSON-RPC 2.0 on streamable HTTP).
//!
//! `client` connects to an external tool provider and turns its tool list into
//! [`ToolDescriptor`](super::ToolDescriptor)s; `server` exposes a local
//! [`ToolRegistry`](super::ToolRegistry) the same way.

pub mod client;
pub mod server;

pub use client::{McpSession, RemoteTool, RemoteToolSource};
pub use server::{router, McpServerHandle};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, thiserror::Error)]
pub enum RemoteSourceError {
    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("Protocol error from {url}: {reason}")]
    Protocol { url: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl McpRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpErrorObject>,
}

impl McpResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Wire shape of a tool's output: text content, plus the raw value as
/// `structuredContent` when it is not already a string.
pub fn output_to_content(output: &Value, is_error: bool) -> Value {
    let mut result = match output {
        Value::Null => json!({ "content": [] }),
        Value::String(text) => json!({ "content": [{ "type": "text", "text": text }] }),
        other => json!({
            "content": [{ "type": "text", "text": other.to_string() }],
            "structuredContent": other,
        }),
    };
    result["isError"] = json!(is_error);
    result
}

/// Inverse of [`output_to_content`]: returns `(is_error, output)`.
pub fn content_to_output(result: &Value) -> (bool, Value) {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(structured) = result.get("structuredContent") {
        return (is_error, structured.clone());
    }

    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let output = match texts.len() {
        0 => Value::Null,
        1 => Value::String(texts[0].to_string()),
        _ => Value::String(texts.join("\n")),
    };
    (is_error, output)
}
