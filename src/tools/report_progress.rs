use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{SideEffect, Tool, ToolContext, ToolResult};
use crate::types::BattleEvent;

/// Lets the model post a progress line to the battle it is working on. The
/// event travels as a side effect; the executor hands it to its reporter.
pub struct ReportProgressTool {}

impl ReportProgressTool {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ReportProgressTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReportProgressTool {
    fn name(&self) -> &str {
        "report_progress"
    }

    fn description(&self) -> &str {
        "Report an intermediate progress message for the current battle. Only valid while a battle is in progress."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Short progress message shown on the dashboard"
                },
                "detail": {
                    "type": "object",
                    "description": "Optional structured detail",
                    "additionalProperties": true
                },
                "markdown_content": {
                    "type": "string",
                    "description": "Optional long-form content"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> Result<ToolResult> {
        let message = params["message"]
            .as_str()
            .ok_or_else(|| anyhow!("Missing message parameter"))?;

        let battle_id = context
            .battle_id
            .as_deref()
            .ok_or_else(|| anyhow!("report_progress called outside of a battle"))?;

        let mut event = BattleEvent::progress(battle_id, message, context.agent_name.clone());
        if let Some(detail) = params.get("detail").and_then(Value::as_object) {
            event = event.with_detail(detail.clone());
        }
        if let Some(content) = params.get("markdown_content").and_then(Value::as_str) {
            event = event.with_content(content);
        }

        Ok(ToolResult {
            success: true,
            output: json!({
                "battle_id": battle_id,
                "reported": message,
            }),
            side_effects: vec![SideEffect::ProgressReported(event)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battle_context() -> ToolContext {
        ToolContext {
            conversation_id: Some("ctx-1".to_string()),
            battle_id: Some("battle-7".to_string()),
            agent_name: "green".to_string(),
        }
    }

    #[tokio::test]
    async fn test_progress_side_effect() {
        let tool = ReportProgressTool::new();
        let params = json!({
            "message": "turn 2 finished",
            "detail": {"turn": 2}
        });

        let result = tool.execute(params, &battle_context()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.side_effects.len(), 1);
        match &result.side_effects[0] {
            SideEffect::ProgressReported(event) => {
                assert_eq!(event.battle_id, "battle-7");
                assert_eq!(event.reported_by, "green");
                assert_eq!(event.detail.as_ref().unwrap()["turn"], 2);
                assert!(!event.is_terminal());
            }
        }
    }

    #[tokio::test]
    async fn test_requires_battle_scope() {
        let tool = ReportProgressTool::new();
        let result = tool
            .execute(json!({"message": "hello"}), &ToolContext::default())
            .await;

        assert!(result.unwrap_err().to_string().contains("outside of a battle"));
    }
}
