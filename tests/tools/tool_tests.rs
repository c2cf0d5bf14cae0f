use anyhow::Result;
use async_trait::async_trait;
use colosseum::executor::{AgentExecutor, ExecutorConfig};
use colosseum::providers::ScriptedProvider;
use colosseum::tools::echo::EchoTool;
use colosseum::tools::mcp::{self, McpServerHandle};
use colosseum::tools::{Tool, ToolCall, ToolContext, ToolError, ToolRegistry, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Lookup;

#[async_trait]
impl Tool for Lookup {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Look up an order by id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}},
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult> {
        Ok(ToolResult::ok(json!({"id": params["id"], "status": "shipped"})))
    }
}

struct Slow;

#[async_trait]
impl Tool for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Never finishes in time"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, _context: &ToolContext) -> Result<ToolResult> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ToolResult::ok(Value::Null))
    }
}

fn call(name: &str, params: Value) -> ToolCall {
    ToolCall {
        name: name.to_string(),
        params,
    }
}

#[tokio::test]
async fn test_echo_through_registry() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(EchoTool::new()).unwrap();

    let result = registry
        .execute(&call("echo", json!({"text": "hi"})), &ToolContext::default(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, json!("hi"));
}

#[tokio::test]
async fn test_arguments_validated_before_execution() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(EchoTool::new()).unwrap();

    let err = registry
        .execute(&call("echo", json!({"text": 5})), &ToolContext::default(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments { .. }));

    let err = registry
        .execute(&call("nope", json!({})), &ToolContext::default(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::UnknownTool(_)));
}

#[tokio::test]
async fn test_tool_timeout() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(Slow).unwrap();

    let err = registry
        .execute(&call("slow", json!({})), &ToolContext::default(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Timeout { .. }));
}

#[tokio::test]
async fn test_remote_tools_merge_without_shadowing() {
    let mut served = ToolRegistry::new();
    served.register_tool(Lookup).unwrap();
    served.register_tool(EchoTool::new()).unwrap();
    let server = McpServerHandle::start(
        mcp::router(Arc::new(served), "task-tools", Duration::from_secs(5)),
        "127.0.0.1",
        0,
    )
    .await
    .unwrap();

    let mut executor = AgentExecutor::new(
        Arc::new(ScriptedProvider::new(vec!["ok".to_string()])),
        ExecutorConfig::default(),
    );
    executor.register(EchoTool::new()).unwrap();

    let added = executor.add_remote_source(&server.url()).await.unwrap();
    assert_eq!(added, vec!["lookup".to_string()]);
    assert_eq!(executor.remote_sources().collect::<Vec<_>>(), vec![server.url().as_str()]);

    let (success, output) = executor
        .invoke_tool(&call("lookup", json!({"id": 7})), &ToolContext::default())
        .await;
    assert!(success);
    assert_eq!(output["status"], "shipped");

    let schemas = executor.tool_schemas();
    assert_eq!(schemas.iter().filter(|s| s["name"] == "echo").count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_source_keeps_local_tools_working() {
    let mut executor = AgentExecutor::new(
        Arc::new(ScriptedProvider::new(vec![
            r#"{"tool": "echo", "params": {"text": "still here"}}"#.to_string(),
            "echo said still here".to_string(),
        ])),
        ExecutorConfig {
            remote_timeout: Duration::from_secs(1),
            ..ExecutorConfig::default()
        },
    );
    executor.register(EchoTool::new()).unwrap();

    assert!(executor.add_remote_source("http://127.0.0.1:1/mcp").await.is_err());

    let reply = executor.handle_message(None, "echo please").await.unwrap();
    assert_eq!(reply.text, "echo said still here");
    assert!(executor.audit_log().records()[0].success);
}
