use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
use colosseum::a2a::A2AClient;
use colosseum::agent::AgentApp;
use colosseum::battle::{
    BattleHarness, BattleSession, HarnessSettings, Orchestrator, PingOrchestrator,
    ScriptedEvaluation, TimeoutPolicy, Verdict,
};
use colosseum::config::OrchestratorKind;
use colosseum::providers::ScriptedProvider;
use colosseum::reporting::RecordingReporter;
use colosseum::types::{BattleContext, BattleState, Outcome, Participant, Role};
use colosseum::Config;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}", addr)
}

async fn spawn_agent(config: &Config, reply: &str) -> String {
    let provider = Arc::new(ScriptedProvider::new(vec![reply.to_string()]));
    let app = AgentApp::build_with(config, provider).await.unwrap();
    spawn_router(app.router()).await
}

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

fn settings(policy: TimeoutPolicy) -> HarnessSettings {
    HarnessSettings {
        participant_timeout: Duration::from_millis(400),
        timeout_policy: policy,
        ..HarnessSettings::default()
    }
}

struct Failing;

#[async_trait]
impl Orchestrator for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, session: &BattleSession) -> Result<Verdict> {
        session.progress("about to fail").await;
        Err(anyhow!("scoring backend unavailable"))
    }
}

#[tokio::test]
async fn test_failing_orchestrator_still_reports_once() {
    let reporter = RecordingReporter::new();
    let harness = BattleHarness::new(
        Arc::new(reporter.clone()),
        A2AClient::default(),
        HarnessSettings::default(),
    );
    let context = BattleContext::new("fail-1", vec![Participant::new(Role::White, "http://127.0.0.1:1")]);

    let summary = harness.run(context, Arc::new(Failing)).await.unwrap();

    assert_eq!(summary.state, BattleState::Aborted);
    let terminals = reporter.terminal_events("fail-1");
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].winner(), Some(&Outcome::no_result()));
    let detail = terminals[0].detail.as_ref().unwrap();
    assert!(detail["error"].as_str().unwrap().contains("scoring backend unavailable"));
    assert_eq!(harness.ledger().state("fail-1"), BattleState::Aborted);
}

#[tokio::test]
async fn test_ping_silent_participant_forfeits() {
    let white = spawn_agent(&Config::default(), "pong").await;
    let red = spawn_hanging().await;
    let reporter = RecordingReporter::new();
    let harness = BattleHarness::new(
        Arc::new(reporter.clone()),
        A2AClient::default(),
        settings(TimeoutPolicy::Forfeit),
    );
    let context = BattleContext::new(
        "ping-1",
        vec![Participant::new(Role::White, white), Participant::new(Role::Red, red)],
    );

    let summary = harness
        .run(context, Arc::new(PingOrchestrator::new()))
        .await
        .unwrap();

    assert_eq!(summary.state, BattleState::Reported);
    assert_eq!(summary.winner.as_str(), "white_agent");

    let terminals = reporter.terminal_events("ping-1");
    assert_eq!(terminals.len(), 1);
    let detail = terminals[0].detail.as_ref().unwrap();
    assert_eq!(detail["responders"], json!(["white"]));
    assert_eq!(detail["silent"], json!(["red"]));
    assert!(reporter
        .progress_events("ping-1")
        .iter()
        .any(|e| e.message == "white replied"));
}

#[tokio::test]
async fn test_ping_draw_policy() {
    let white = spawn_agent(&Config::default(), "pong").await;
    let red = spawn_hanging().await;
    let reporter = RecordingReporter::new();
    let harness = BattleHarness::new(
        Arc::new(reporter.clone()),
        A2AClient::default(),
        settings(TimeoutPolicy::Draw),
    );
    let context = BattleContext::new(
        "ping-2",
        vec![Participant::new(Role::White, white), Participant::new(Role::Red, red)],
    );

    let summary = harness
        .run(context, Arc::new(PingOrchestrator::new()))
        .await
        .unwrap();
    assert_eq!(summary.winner, Outcome::draw());
}

#[tokio::test]
async fn test_ping_retry_policy_resends_to_silent() {
    let white = spawn_agent(&Config::default(), "pong").await;
    let red = spawn_hanging().await;
    let reporter = RecordingReporter::new();
    let harness = BattleHarness::new(
        Arc::new(reporter.clone()),
        A2AClient::default(),
        settings(TimeoutPolicy::Retry { attempts: 1 }),
    );
    let context = BattleContext::new(
        "ping-3",
        vec![Participant::new(Role::White, white), Participant::new(Role::Red, red)],
    );

    let summary = harness
        .run(context, Arc::new(PingOrchestrator::new()))
        .await
        .unwrap();

    assert_eq!(summary.winner.as_str(), "white_agent");
    assert!(reporter
        .progress_events("ping-3")
        .iter()
        .any(|e| e.message.starts_with("Retrying 1 silent")));
}

#[tokio::test]
async fn test_scripted_evaluation_over_a2a() {
    let white = spawn_agent(
        &Config::default(),
        r#"<json>{"name": "respond", "kwargs": {"content": "I am ready"}}</json>"#,
    )
    .await;
    let reporter = RecordingReporter::new();
    let harness = BattleHarness::new(
        Arc::new(reporter.clone()),
        A2AClient::default(),
        HarnessSettings::default(),
    );
    let context = BattleContext::new("eval-1", vec![Participant::new(Role::White, white)]);

    let summary = harness
        .run(context, Arc::new(ScriptedEvaluation::default()))
        .await
        .unwrap();

    assert_eq!(summary.winner.as_str(), "white_agent");
    let terminal = &reporter.terminal_events("eval-1")[0];
    let detail = terminal.detail.as_ref().unwrap();
    assert_eq!(detail["success"], true);
    assert_eq!(detail["turns"], 1);
    assert!(terminal.markdown_content.as_ref().unwrap().contains("| 1 | pass |"));
}

#[tokio::test]
async fn test_green_agent_end_to_end() {
    let reports: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
    let sink = reports.clone();
    let backend = spawn_router(Router::new().route(
        "/battles/:id",
        post(move |Path(id): Path<String>, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push((id, body));
                StatusCode::NO_CONTENT
            }
        }),
    ))
    .await;

    let white = spawn_agent(&Config::default(), "pong").await;

    let mut config = Config::default();
    config.agent.role = Role::Green;
    config.battle.orchestrator = OrchestratorKind::Ping;
    config.battle.participant_timeout_secs = 5;
    config.backend.url = Some(backend);
    let green = spawn_agent(&config, "unused").await;

    let start = json!({
        "type": "battle_start",
        "battle_id": "e2e-1",
        "green_battle_context": {"task_config": ""},
        "opponent_infos": [{"name": "white", "agent_url": white}]
    });
    let reply = A2AClient::default()
        .send(&green, &start.to_string(), Duration::from_secs(10))
        .await
        .unwrap();

    let summary: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(summary["ok"], true);
    assert_eq!(summary["battle_id"], "e2e-1");
    assert_eq!(summary["winner"], "draw");

    let reports = reports.lock().unwrap();
    assert!(reports.iter().all(|(id, _)| id == "e2e-1"));
    let results: Vec<_> = reports.iter().filter(|(_, b)| b["is_result"] == true).collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1["winner"], "draw");
    assert_eq!(results[0].1["reported_by"], "Green Agent");
}
