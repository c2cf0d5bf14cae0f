use axum::{
    body::Bytes,
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use super::{
    A2AEvent, A2AMessage, AgentCard, Artifact, ArtifactUpdate, MessageSendParams, Part,
    RpcRequest, RpcResponse, StatusUpdate, TaskState, TaskStatus, CARD_PATH, INTERNAL_ERROR,
    INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::api::health_check;
use crate::executor::{AgentExecutor, ExecutorEvent};

#[derive(Clone)]
pub struct A2AState {
    pub executor: Arc<AgentExecutor>,
    pub card: Arc<AgentCard>,
}

pub fn create_router(state: A2AState) -> Router {
    Router::new()
        .route(CARD_PATH, get(get_card))
        .route("/health", get(health_check))
        .route("/", post(handle_rpc))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_card(State(state): State<A2AState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

async fn handle_rpc(State(state): State<A2AState>, body: Bytes) -> Response {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Json(RpcResponse::failure(
                Value::Null,
                INVALID_REQUEST,
                format!("Invalid JSON-RPC request: {}", e),
            ))
            .into_response();
        }
    };
    let id = request.id.clone();

    let params: MessageSendParams = match request.method.as_str() {
        "message/send" | "message/stream" => match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(e) => {
                return Json(RpcResponse::failure(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid message params: {}", e),
                ))
                .into_response();
            }
        },
        other => {
            return Json(RpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ))
            .into_response();
        }
    };

    if request.method == "message/stream" {
        return stream_message(state, id, params.message).into_response();
    }

    let text = params.message.text();
    match state
        .executor
        .handle_message(params.message.context_id.as_deref(), &text)
        .await
    {
        Ok(reply) => Json(RpcResponse::success(
            id,
            A2AEvent::Message(A2AMessage::agent(reply.text, reply.context_id)),
        ))
        .into_response(),
        Err(e) => {
            log::error!("message/send failed: {:#}", e);
            Json(RpcResponse::failure(id, INTERNAL_ERROR, format!("{:#}", e))).into_response()
        }
    }
}

fn status_event(context_id: &str, state: TaskState, text: Option<String>, is_final: bool) -> A2AEvent {
    A2AEvent::StatusUpdate(StatusUpdate {
        context_id: context_id.to_string(),
        status: TaskStatus {
            state,
            message: text.map(|t| A2AMessage::agent(t, context_id)),
        },
        is_final,
    })
}

fn sse_event(id: &Value, event: A2AEvent) -> Result<Event, Infallible> {
    let body = serde_json::to_string(&RpcResponse::success(id.clone(), event)).unwrap_or_default();
    Ok(Event::default().data(body))
}

fn stream_message(
    state: A2AState,
    id: Value,
    message: A2AMessage,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let context_id = message
        .context_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let text = message.text();

    let (tx, mut rx) = mpsc::channel::<ExecutorEvent>(32);
    let executor = state.executor.clone();
    let run_context = context_id.clone();
    let run = tokio::spawn(async move {
        executor
            .handle_message_streaming(Some(&run_context), &text, tx)
            .await
    });

    let stream = async_stream::stream! {
        yield sse_event(&id, status_event(&context_id, TaskState::Working, None, false));

        while let Some(event) = rx.recv().await {
            let note = match event {
                ExecutorEvent::Working(note) => note,
                ExecutorEvent::ToolFinished { tool, success } => {
                    format!("Tool {} {}", tool, if success { "finished" } else { "failed" })
                }
            };
            yield sse_event(&id, status_event(&context_id, TaskState::Working, Some(note), false));
        }

        match run.await {
            Ok(Ok(reply)) => {
                yield sse_event(&id, A2AEvent::ArtifactUpdate(ArtifactUpdate {
                    context_id: context_id.clone(),
                    artifact: Artifact {
                        name: Some("response".to_string()),
                        parts: vec![Part::text(reply.text)],
                    },
                }));
                yield sse_event(&id, status_event(&context_id, TaskState::Completed, None, true));
            }
            Ok(Err(e)) => {
                log::error!("message/stream failed: {:#}", e);
                yield sse_event(&id, status_event(&context_id, TaskState::Failed, Some(format!("{:#}", e)), true));
            }
            Err(e) => {
                log::error!("message/stream task panicked: {}", e);
                yield sse_event(&id, status_event(&context_id, TaskState::Failed, Some("internal error".to_string()), true));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::executor::ExecutorConfig;
    use crate::providers::ScriptedProvider;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    fn test_app(responses: &[&str]) -> Router {
        let provider = Arc::new(ScriptedProvider::new(
            responses.iter().map(|s| s.to_string()).collect(),
        ));
        let executor = AgentExecutor::new(provider, ExecutorConfig::default());
        let card = AgentCard::from_config(&AgentConfig::default(), "http://localhost:9001");
        create_router(A2AState {
            executor: Arc::new(executor),
            card: Arc::new(card),
        })
    }

    async fn post_json(app: Router, body: Value) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn send_request(method: &str, text: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": "req-1",
            "method": method,
            "params": {"message": {
                "role": "user",
                "messageId": "m1",
                "parts": [{"kind": "text", "text": text}]
            }}
        })
    }

    #[tokio::test]
    async fn test_agent_card() {
        let response = test_app(&["x"])
            .oneshot(Request::builder().uri(CARD_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let card: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(card["name"], "colosseum_agent");
        assert_eq!(card["capabilities"]["streaming"], true);
        assert_eq!(card["defaultInputModes"][0], "text");
    }

    #[tokio::test]
    async fn test_message_send() {
        let (status, body) = post_json(test_app(&["pong"]), send_request("message/send", "ping")).await;
        assert_eq!(status, StatusCode::OK);

        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["result"]["kind"], "message");
        assert_eq!(json["result"]["parts"][0]["text"], "pong");
        assert!(json["result"]["contextId"].is_string());
    }

    #[tokio::test]
    async fn test_message_stream_ends_with_final_event() {
        let (_, body) = post_json(test_app(&["streamed"]), send_request("message/stream", "go")).await;

        let events: Vec<Value> = body
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| serde_json::from_str(d.trim()).unwrap())
            .collect();
        let last = events.last().unwrap();
        assert_eq!(last["result"]["kind"], "status-update");
        assert_eq!(last["result"]["final"], true);
        assert_eq!(last["result"]["status"]["state"], "completed");
        assert!(events
            .iter()
            .any(|e| e["result"]["artifact"]["parts"][0]["text"] == "streamed"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_, body) = post_json(test_app(&["x"]), send_request("tasks/cancel", "x")).await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let (_, body) = post_json(test_app(&["x"]), json!({"hello": "world"})).await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_model_failure_is_internal_error() {
        let executor = AgentExecutor::new(
            Arc::new(crate::providers::UnconfiguredProvider),
            ExecutorConfig::default(),
        );
        let app = create_router(A2AState {
            executor: Arc::new(executor),
            card: Arc::new(AgentCard::from_config(&AgentConfig::default(), "http://x")),
        });

        let (_, body) = post_json(app, send_request("message/send", "hi")).await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"]["code"], INTERNAL_ERROR);
    }
}
