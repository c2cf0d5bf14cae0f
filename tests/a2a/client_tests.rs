use axum::{routing::post, Router};
use colosseum::a2a::A2AClient;
use colosseum::agent::AgentApp;
use colosseum::providers::ScriptedProvider;
use colosseum::Config;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

async fn spawn_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}", addr)
}

async fn spawn_agent(reply: &str) -> String {
    let provider = Arc::new(ScriptedProvider::new(vec![reply.to_string()]));
    let app = AgentApp::build_with(&Config::default(), provider).await.unwrap();
    spawn_router(app.router()).await
}

/// Accepts the request and never answers within any test's timeout.
async fn spawn_hanging() -> String {
    spawn_router(Router::new().route(
        "/",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ""
        }),
    ))
    .await
}

#[tokio::test]
async fn test_broadcast_with_one_hanging_target() {
    let first = spawn_agent("pong").await;
    let second = spawn_agent("pong").await;
    let hanging = spawn_hanging().await;
    let client = A2AClient::default();

    let started = Instant::now();
    let results = client
        .send_broadcast(
            &[first.clone(), hanging.clone(), second.clone()],
            "ping",
            Duration::from_millis(500),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(results.len(), 3);
    assert_eq!(results[&first].as_deref(), Ok("pong"));
    assert_eq!(results[&second].as_deref(), Ok("pong"));

    let err = results[&hanging].as_ref().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.target(), hanging);
}

#[tokio::test]
async fn test_distinct_messages_per_target() {
    let white = spawn_agent("white here").await;
    let red = spawn_agent("red here").await;
    let client = A2AClient::default();

    let results = client
        .send_distinct(
            vec![
                (white.clone(), "hello white".to_string()),
                (red.clone(), "hello red".to_string()),
            ],
            Duration::from_secs(5),
        )
        .await;

    assert_eq!(results[&white].as_deref(), Ok("white here"));
    assert_eq!(results[&red].as_deref(), Ok("red here"));
}

#[tokio::test]
async fn test_conversation_continues_in_context() {
    let agent = spawn_agent("noted").await;
    let client = A2AClient::default();

    let (_, context_id) = client
        .send_in_context(&agent, "first", None, Duration::from_secs(5))
        .await
        .unwrap();
    let context_id = context_id.expect("server allocates a context id");

    let (text, same) = client
        .send_in_context(&agent, "second", Some(&context_id), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(text, "noted");
    assert_eq!(same.as_deref(), Some(context_id.as_str()));
}

#[tokio::test]
async fn test_streaming_send_collects_reply() {
    let agent = spawn_agent("streamed pong").await;
    let client = A2AClient::default();

    let text = client
        .send_streaming(&agent, "ping", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(text.contains("streamed pong"));
}

#[tokio::test]
async fn test_health_check() {
    let agent = spawn_agent("ok").await;
    let client = A2AClient::new(Duration::from_millis(500));

    assert!(client.check_health(&agent).await);
    assert_eq!(client.fetch_card(&agent).await.unwrap().name, "colosseum_agent");
    assert!(!client.check_health("http://127.0.0.1:1").await);
}

#[tokio::test]
async fn test_connection_refused_names_target() {
    let client = A2AClient::default();

    let err = client
        .send("http://127.0.0.1:1", "ping", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(!err.is_timeout());
    assert_eq!(err.target(), "http://127.0.0.1:1");
}
