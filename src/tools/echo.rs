use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolResult};

pub struct EchoTool {}

impl EchoTool {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged. Useful for checking that tool calls reach the agent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult> {
        let text = params["text"]
            .as_str()
            .ok_or_else(|| anyhow!("Missing text parameter"))?;

        Ok(ToolResult::ok(Value::String(text.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_text() {
        let tool = EchoTool::new();
        let result = tool
            .execute(json!({"text": "hi"}), &ToolContext::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, json!("hi"));
        assert!(result.side_effects.is_empty());
    }

    #[tokio::test]
    async fn test_echo_missing_text() {
        let tool = EchoTool::new();
        let result = tool.execute(json!({}), &ToolContext::default()).await;
        assert!(result.is_err());
    }
}
