use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{output_to_content, McpRequest, McpResponse, PROTOCOL_VERSION, SESSION_HEADER};
use crate::tools::{ToolCall, ToolContext, ToolError, ToolRegistry};

#[derive(Clone)]
struct McpState {
    registry: Arc<ToolRegistry>,
    server_name: String,
    tool_timeout: Duration,
}

/// Serves `registry` as an MCP tool provider on `/` and `/mcp`.
pub fn router(registry: Arc<ToolRegistry>, server_name: &str, tool_timeout: Duration) -> Router {
    let state = McpState {
        registry,
        server_name: server_name.to_string(),
        tool_timeout,
    };

    Router::new()
        .route("/", post(handle_rpc))
        .route("/mcp", post(handle_rpc))
        .with_state(state)
}

async fn handle_rpc(State(state): State<McpState>, Json(request): Json<McpRequest>) -> Response {
    let Some(id) = request.id.clone() else {
        // Notifications get no JSON-RPC response.
        return StatusCode::ACCEPTED.into_response();
    };

    match request.method.as_str() {
        "initialize" => {
            let session = uuid::Uuid::new_v4().to_string();
            let body = McpResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": state.server_name,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            );
            ([(SESSION_HEADER, session)], Json(body)).into_response()
        }
        "ping" => Json(McpResponse::success(id, json!({}))).into_response(),
        "tools/list" => {
            let mut descriptors: Vec<_> = state.registry.descriptors().collect();
            descriptors.sort_by(|a, b| a.name.cmp(&b.name));
            let tools: Vec<Value> = descriptors
                .into_iter()
                .map(|d| {
                    json!({
                        "name": d.name,
                        "description": d.description,
                        "inputSchema": d.parameters,
                    })
                })
                .collect();
            Json(McpResponse::success(id, json!({ "tools": tools }))).into_response()
        }
        "tools/call" => Json(call_tool(&state, id, &request.params).await).into_response(),
        other => Json(McpResponse::failure(
            id,
            -32601,
            format!("Method not found: {}", other),
        ))
        .into_response(),
    }
}

async fn call_tool(state: &McpState, id: Value, params: &Value) -> McpResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return McpResponse::failure(id, -32602, "tools/call requires a name");
    };
    let call = ToolCall {
        name: name.to_string(),
        params: params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({})),
    };
    let context = ToolContext {
        agent_name: state.server_name.clone(),
        ..Default::default()
    };

    match state
        .registry
        .execute(&call, &context, state.tool_timeout)
        .await
    {
        Ok(result) => McpResponse::success(id, output_to_content(&result.output, !result.success)),
        Err(ToolError::UnknownTool(name)) => {
            McpResponse::failure(id, -32602, format!("Unknown tool: {}", name))
        }
        Err(e) => McpResponse::success(id, output_to_content(&json!(e.to_string()), true)),
    }
}

/// A tool provider running in the background, e.g. task-scoped tools the
/// green agent hands to a participant for one battle.
pub struct McpServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl McpServerHandle {
    pub async fn start(router: Router, host: &str, port: u16) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind MCP server on {}:{}", host, port))?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                log::error!("MCP server on {} stopped: {}", addr, e);
            }
        });

        log::info!("MCP server listening on {}", addr);
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub async fn is_ready(&self) -> bool {
        matches!(
            tokio::time::timeout(
                Duration::from_secs(1),
                tokio::net::TcpStream::connect(self.addr)
            )
            .await,
            Ok(Ok(_))
        )
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
        log::info!("MCP server on {} shut down", self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::echo::EchoTool;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool::new()).unwrap();
        router(Arc::new(registry), "test-tools", Duration::from_secs(5))
    }

    async fn rpc(app: Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_tools_list() {
        let (status, json) = rpc(
            test_router(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"]["tools"][0]["name"], "echo");
        assert_eq!(json["result"]["tools"][0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_tools_call_echo() {
        let (_, json) = rpc(
            test_router(),
            json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "echo", "arguments": {"text": "hi"}}
            }),
        )
        .await;

        assert_eq!(json["result"]["isError"], false);
        assert_eq!(json["result"]["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_invalid_arguments_reported_as_tool_error() {
        let (_, json) = rpc(
            test_router(),
            json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "echo", "arguments": {}}
            }),
        )
        .await;

        assert_eq!(json["result"]["isError"], true);
    }

    #[tokio::test]
    async fn test_notification_accepted() {
        let (status, json) = rpc(
            test_router(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(json.is_null());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_, json) = rpc(
            test_router(),
            json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}),
        )
        .await;

        assert_eq!(json["error"]["code"], -32601);
    }
}
