use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{content_to_output, McpRequest, McpResponse, RemoteSourceError, PROTOCOL_VERSION, SESSION_HEADER};
use crate::tools::{Tool, ToolContext, ToolDescriptor, ToolResult, ToolSource};

const MAX_LIST_PAGES: usize = 16;

/// One established session with a remote tool provider.
pub struct McpSession {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl McpSession {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteSourceError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("colosseum/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteSourceError::Connection {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            url,
            client,
            timeout,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn initialize(&self) -> Result<Value, RemoteSourceError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "colosseum",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;

        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<Value>, RemoteSourceError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let page = self.request("tools/list", params).await?;

            let items = page
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| self.protocol("tools/list result has no tools array"))?;
            tools.extend(items.iter().cloned());

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, RemoteSourceError> {
        self.request(
            "tools/call",
            json!({
                "name": name,
                "arguments": arguments,
            }),
        )
        .await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RemoteSourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = McpRequest::new(id, method, params);

        let response = self.post(&request).await?;
        if !response.status().is_success() {
            return Err(self.protocol(format!("{} returned HTTP {}", method, response.status())));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.write() {
                *guard = Some(session.to_string());
            }
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        let body = response.text().await.map_err(|e| self.transport(e))?;
        let rpc = if is_event_stream {
            parse_event_stream(&body, id).ok_or_else(|| self.protocol("no JSON-RPC response in event stream"))?
        } else {
            serde_json::from_str::<McpResponse>(&body)
                .map_err(|e| self.protocol(format!("invalid JSON-RPC response: {}", e)))?
        };

        if let Some(error) = rpc.error {
            return Err(self.protocol(format!("{} (code {})", error.message, error.code)));
        }
        rpc.result
            .ok_or_else(|| self.protocol(format!("{} response has neither result nor error", method)))
    }

    async fn notify(&self, method: &str) -> Result<(), RemoteSourceError> {
        let response = self.post(&McpRequest::notification(method)).await?;
        if !response.status().is_success() {
            return Err(self.protocol(format!("{} returned HTTP {}", method, response.status())));
        }
        Ok(())
    }

    async fn post(&self, request: &McpRequest) -> Result<reqwest::Response, RemoteSourceError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(request);

        let session = self.session_id.read().ok().and_then(|guard| guard.clone());
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }

        match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(self.transport(e)),
            Err(_) => Err(RemoteSourceError::Timeout {
                url: self.url.clone(),
            }),
        }
    }

    fn transport(&self, e: reqwest::Error) -> RemoteSourceError {
        if e.is_timeout() {
            RemoteSourceError::Timeout {
                url: self.url.clone(),
            }
        } else {
            RemoteSourceError::Connection {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        }
    }

    fn protocol(&self, reason: impl Into<String>) -> RemoteSourceError {
        RemoteSourceError::Protocol {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }
}

fn parse_event_stream(body: &str, id: u64) -> Option<McpResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<McpResponse>(data.trim()).ok())
        .find(|rpc| rpc.id == json!(id))
}

/// A tool advertised by a remote source, invoked through its session.
pub struct RemoteTool {
    name: String,
    description: String,
    input_schema: Value,
    session: Arc<McpSession>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult> {
        let result = self.session.call_tool(&self.name, params).await?;
        let (is_error, output) = content_to_output(&result);

        Ok(if is_error {
            ToolResult::failed(output)
        } else {
            ToolResult::ok(output)
        })
    }
}

/// Connected remote source and the tools it advertised at handshake time.
pub struct RemoteToolSource {
    session: Arc<McpSession>,
    server_name: Option<String>,
    tools: Vec<Arc<RemoteTool>>,
}

impl RemoteToolSource {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, RemoteSourceError> {
        let session = Arc::new(McpSession::new(url, timeout)?);
        let info = session.initialize().await?;
        let server_name = info
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let tools = session
            .list_tools()
            .await?
            .into_iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?.to_string();
                Some(Arc::new(RemoteTool {
                    name,
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: entry
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                    session: session.clone(),
                }))
            })
            .collect();

        Ok(Self {
            session,
            server_name,
            tools,
        })
    }

    pub fn url(&self) -> &str {
        self.session.url()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|tool| {
                ToolDescriptor::from_tool(
                    tool.clone() as Arc<dyn Tool>,
                    ToolSource::Remote {
                        url: self.url().to_string(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_stream_matches_id() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"a\":1}}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"b\":2}}\n\n";

        let rpc = parse_event_stream(body, 2).unwrap();
        assert_eq!(rpc.result.unwrap()["b"], 2);
        assert!(parse_event_stream(body, 3).is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("http://127.0.0.1:{}/mcp", port);
        let result = RemoteToolSource::connect(&url, Duration::from_secs(2)).await;

        assert!(matches!(result, Err(RemoteSourceError::Connection { .. })));
    }
}
