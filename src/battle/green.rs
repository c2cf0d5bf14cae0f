use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{BattleHarness, BattleLedger, BattleStart, HarnessSettings, Orchestrator};
use crate::a2a::A2AClient;
use crate::config::Config;
use crate::executor::InboundHandler;
use crate::reporting::{BackendReporter, LogReporter, Reporter, RetryPolicy};
use crate::tools::{Tool, ToolContext, ToolResult};
use crate::types::BattleContext;

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Overrides the backend named in battle_start messages.
    pub url: Option<String>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: None,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl BackendSettings {
    pub fn from_settings(config: &Config) -> Self {
        Self {
            url: config.backend.url.clone(),
            retry: RetryPolicy::from_config(&config.backend),
            request_timeout: Duration::from_secs(config.backend.request_timeout_secs),
        }
    }
}

/// The judging side of a battle: turns `battle_start` messages into harness
/// runs against the configured orchestrator.
pub struct GreenAgent {
    orchestrator: Arc<dyn Orchestrator>,
    client: A2AClient,
    settings: HarnessSettings,
    backend: BackendSettings,
    ledger: BattleLedger,
    reporter: Option<Arc<dyn Reporter>>,
}

impl GreenAgent {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, client: A2AClient, settings: HarnessSettings) -> Self {
        Self {
            orchestrator,
            client,
            settings,
            backend: BackendSettings::default(),
            ledger: BattleLedger::new(),
            reporter: None,
        }
    }

    pub fn from_config(config: &Config, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self::new(
            orchestrator,
            A2AClient::new(config.a2a.health_check_timeout()),
            HarnessSettings::from_settings(config),
        )
        .with_backend(BackendSettings::from_settings(config))
    }

    pub fn with_backend(mut self, backend: BackendSettings) -> Self {
        self.backend = backend;
        self
    }

    /// Fixed reporter for every battle, instead of one per backend URL.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn ledger(&self) -> &BattleLedger {
        &self.ledger
    }

    fn reporter_for(&self, context: &BattleContext) -> Arc<dyn Reporter> {
        if let Some(reporter) = &self.reporter {
            return reporter.clone();
        }
        match context.backend_url() {
            Some(url) => Arc::new(BackendReporter::new(
                url,
                self.backend.retry.clone(),
                self.backend.request_timeout,
            )),
            None => {
                log::warn!(
                    "[battle {}] No backend configured; results go to the log only",
                    context.battle_id()
                );
                Arc::new(LogReporter)
            }
        }
    }

    /// Runs the battle described by `battle_start_json` to completion and
    /// returns a compact JSON summary.
    pub async fn start_battle(&self, battle_start_json: &str) -> Value {
        let start = match BattleStart::parse(battle_start_json) {
            Ok(start) => start,
            Err(e) => {
                log::warn!("Rejected battle_start: {}", e);
                return json!({ "ok": false, "error": e.to_string() });
            }
        };

        let context = start.into_context(self.backend.url.as_deref());
        let battle_id = context.battle_id().to_string();
        let harness = BattleHarness::new(self.reporter_for(&context), self.client.clone(), self.settings.clone())
            .with_ledger(self.ledger.clone());

        match harness.run(context, self.orchestrator.clone()).await {
            Ok(summary) => json!({
                "ok": true,
                "battle_id": summary.battle_id,
                "state": summary.state,
                "winner": summary.winner,
                "message": summary.message,
            }),
            Err(e) => {
                log::error!("[battle {}] {}", battle_id, e);
                json!({ "ok": false, "battle_id": battle_id, "error": e.to_string() })
            }
        }
    }
}

fn is_battle_start(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{')
        && serde_json::from_str::<Value>(trimmed)
            .ok()
            .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "battle_start"))
            .unwrap_or(false)
}

#[async_trait]
impl InboundHandler for GreenAgent {
    async fn handle(&self, text: &str, _context: &ToolContext) -> Result<Option<String>> {
        if !is_battle_start(text) {
            return Ok(None);
        }
        Ok(Some(self.start_battle(text).await.to_string()))
    }
}

/// Exposes [`GreenAgent::start_battle`] to the model.
pub struct StartBattleTool {
    agent: Arc<GreenAgent>,
}

impl StartBattleTool {
    pub fn new(agent: Arc<GreenAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Tool for StartBattleTool {
    fn name(&self) -> &str {
        "start_battle"
    }

    fn description(&self) -> &str {
        "Run a battle from the battle_start JSON sent by the backend and report its result."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "battle_start_json": {
                    "type": "string",
                    "description": "The battle_start message, verbatim"
                }
            },
            "required": ["battle_start_json"]
        })
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> Result<ToolResult> {
        let raw = params
            .get("battle_start_json")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let summary = self.agent.start_battle(raw).await;

        let ok = summary.get("ok").and_then(Value::as_bool).unwrap_or(false);
        Ok(if ok {
            ToolResult::ok(summary)
        } else {
            ToolResult::failed(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleSession, Verdict};
    use crate::reporting::RecordingReporter;
    use crate::types::Outcome;

    struct Immediate;

    #[async_trait]
    impl Orchestrator for Immediate {
        fn name(&self) -> &str {
            "immediate"
        }

        async fn run(&self, _session: &BattleSession) -> Result<Verdict> {
            Ok(Verdict::new(Outcome::draw(), "no contest"))
        }
    }

    fn agent(reporter: &RecordingReporter) -> GreenAgent {
        GreenAgent::new(Arc::new(Immediate), A2AClient::default(), HarnessSettings::default())
            .with_reporter(Arc::new(reporter.clone()))
    }

    const START: &str = r#"{"type": "battle_start", "battle_id": "g-1",
        "red_battle_contexts": {"http://127.0.0.1:1": {}}}"#;

    #[tokio::test]
    async fn test_start_battle_summary() {
        let reporter = RecordingReporter::new();
        let summary = agent(&reporter).start_battle(START).await;

        assert_eq!(summary["ok"], true);
        assert_eq!(summary["winner"], "draw");
        assert_eq!(summary["state"], "Reported");
        assert_eq!(reporter.terminal_events("g-1").len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_battle_start() {
        let reporter = RecordingReporter::new();
        let summary = agent(&reporter).start_battle(r#"{"type": "hello"}"#).await;

        assert_eq!(summary["ok"], false);
        assert!(summary["error"].as_str().unwrap().contains("not_battle_start"));
        assert!(reporter.events().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_handler_only_takes_battle_start() {
        let reporter = RecordingReporter::new();
        let green = agent(&reporter);
        let context = ToolContext::default();

        assert!(green.handle("hello", &context).await.unwrap().is_none());
        let reply = green.handle(START, &context).await.unwrap().unwrap();
        assert!(reply.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn test_tool_failure_for_bad_input() {
        let reporter = RecordingReporter::new();
        let tool = StartBattleTool::new(Arc::new(agent(&reporter)));

        let result = tool
            .execute(json!({"battle_start_json": "oops"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(!result.success);
    }
}
