#![cfg(unix)]

use axum::{http::StatusCode, routing::post, Json, Router};
use colosseum::a2a::A2AClient;
use colosseum::supervisor::{ProbeSettings, ReadyNotifier, Supervisor, SupervisorConfig};
use colosseum::reporting::RetryPolicy;
use colosseum::types::{AgentAddress, ProcessState};
use futures::future::join_all;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn agent_config(port: u16) -> SupervisorConfig {
    let mut config = SupervisorConfig::new(
        AgentAddress::new("127.0.0.1", port),
        env!("CARGO_BIN_EXE_colosseum"),
        vec![
            "serve".to_string(),
            "--host".to_string(),
            "{host}".to_string(),
            "--port".to_string(),
            "{port}".to_string(),
        ],
    );
    config.grace_period = Duration::from_secs(5);
    config.probe = ProbeSettings {
        attempts: 100,
        interval: Duration::from_millis(100),
        connect_timeout: Duration::from_millis(500),
    };
    config
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test]
async fn test_start_then_reset_keeps_address() {
    let supervisor = Supervisor::new(agent_config(9031));

    let started = supervisor.start().await.unwrap();
    assert_eq!(started.state, ProcessState::Running);
    assert_eq!(started.address.port, 9031);
    let first_pid = started.pid.unwrap();

    let status = supervisor.status().await;
    assert_eq!(status.state, ProcessState::Running);
    assert!(A2AClient::default().check_health("http://127.0.0.1:9031").await);

    let reset_task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.reset().await })
    };
    let mut saw_restarting = false;
    while !reset_task.is_finished() {
        if supervisor.status().await.state == ProcessState::Restarting {
            saw_restarting = true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let reset = reset_task.await.unwrap().unwrap();

    assert!(saw_restarting);
    assert_eq!(reset.state, ProcessState::Running);
    assert_eq!(reset.address.port, 9031);
    let second_pid = reset.pid.unwrap();
    assert_ne!(first_pid, second_pid);
    assert!(!is_alive(first_pid));
    assert!(A2AClient::default().check_health("http://127.0.0.1:9031").await);

    supervisor.shutdown().await.unwrap();
    assert!(!is_alive(second_pid));
}

#[tokio::test]
async fn test_concurrent_resets_leave_one_child() {
    let supervisor = Supervisor::new(agent_config(9032));
    let first = supervisor.start().await.unwrap();

    let resets = (0..5).map(|_| {
        let supervisor = supervisor.clone();
        async move { supervisor.reset().await }
    });
    let results: Vec<_> = join_all(resets).await.into_iter().map(Result::unwrap).collect();

    let status = supervisor.status().await;
    assert_eq!(status.state, ProcessState::Running);
    assert_eq!(status.address.port, 9032);
    let running = status.pid.unwrap();
    assert!(is_alive(running));

    let mut seen: Vec<u32> = results.iter().filter_map(|s| s.pid).collect();
    seen.push(first.pid.unwrap());
    seen.sort_unstable();
    seen.dedup();
    for pid in seen.into_iter().filter(|pid| *pid != running) {
        assert!(!is_alive(pid), "replaced child {} still running", pid);
    }
    assert!(status.generation <= 6);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reset_notifies_after_ready() {
    let notices: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = notices.clone();
    let app = Router::new().route(
        "/ready",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                // The replacement must already accept connections.
                let healthy = A2AClient::default().check_health("http://127.0.0.1:9033").await;
                sink.lock().unwrap().push(serde_json::json!({"body": body, "healthy": healthy}));
                StatusCode::NO_CONTENT
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let notifier = ReadyNotifier::new(
        format!("http://{}/ready", addr),
        RetryPolicy::once(),
        Duration::from_secs(5),
    );
    let supervisor = Supervisor::with_notifier(agent_config(9033), notifier);
    supervisor.start().await.unwrap();
    assert!(notices.lock().unwrap().is_empty());

    let status = supervisor.reset_and_notify(None, Some("white-1")).await.unwrap();

    let notices = notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["healthy"], true);
    assert_eq!(notices[0]["body"]["agent_url"], "http://127.0.0.1:9033");
    assert_eq!(notices[0]["body"]["agent_id"], "white-1");
    assert_eq!(notices[0]["body"]["generation"], status.generation);
    drop(notices);

    supervisor.shutdown().await.unwrap();
}
