//! Green-side battle control: the state machine, the harness that guarantees
//! one terminal record per battle, and the orchestrators it runs.

pub mod green;
pub mod harness;
pub mod ping;
pub mod policy;
pub mod scripted;
pub mod start;
pub mod state;
pub mod tags;

pub use green::{BackendSettings, GreenAgent, StartBattleTool};
pub use harness::{BattleHarness, BattleSummary, HarnessSettings};
pub use ping::PingOrchestrator;
pub use policy::TimeoutPolicy;
pub use scripted::ScriptedEvaluation;
pub use start::BattleStart;
pub use state::{BattleLedger, BattleStateMachine, BattleTransition};
pub use tags::parse_tags;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::a2a::{A2AClient, CommunicationError};
use crate::config::OrchestratorKind;
use crate::reporting::Reporter;
use crate::types::{BattleContext, BattleEvent, BattleId, BattleState, ContextId, Outcome, Participant};

#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    #[error("Invalid battle start: {0}")]
    InvalidStart(String),

    #[error("Battle {0} has no participants")]
    NoParticipants(BattleId),

    #[error("Orchestration failed: {0}")]
    Orchestration(String),

    #[error("Terminal event for battle {battle_id} could not be delivered: {reason}")]
    TerminalUndeliverable { battle_id: BattleId, reason: String },

    #[error("Invalid battle transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: BattleState,
        event: BattleTransition,
    },

    #[error("Battle {0} already has a terminal result")]
    AlreadyReported(BattleId),
}

/// What an orchestrator concludes. The harness turns it into the single
/// terminal event of the battle.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub winner: Outcome,
    pub message: String,
    pub detail: Option<Map<String, Value>>,
    pub markdown: Option<String>,
}

impl Verdict {
    pub fn new(winner: Outcome, message: impl Into<String>) -> Self {
        Self {
            winner,
            message: message.into(),
            detail: None,
            markdown: None,
        }
    }

    pub fn with_detail(mut self, detail: Map<String, Value>) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.markdown = Some(markdown.into());
        self
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn name(&self) -> &str;

    /// Drives the battle. Progress goes through `session`; the terminal
    /// outcome is the returned verdict. An error aborts the battle.
    async fn run(&self, session: &BattleSession) -> Result<Verdict>;
}

/// The orchestrator selected by `[battle] orchestrator`.
pub fn orchestrator_for(kind: OrchestratorKind) -> Arc<dyn Orchestrator> {
    match kind {
        OrchestratorKind::Ping => Arc::new(PingOrchestrator::new()),
        OrchestratorKind::Scripted => Arc::new(ScriptedEvaluation::default()),
    }
}

/// Everything an orchestrator may touch during one battle.
pub struct BattleSession {
    context: BattleContext,
    client: A2AClient,
    reporter: Arc<dyn Reporter>,
    settings: HarnessSettings,
}

impl BattleSession {
    pub fn new(
        context: BattleContext,
        client: A2AClient,
        reporter: Arc<dyn Reporter>,
        settings: HarnessSettings,
    ) -> Self {
        Self {
            context,
            client,
            reporter,
            settings,
        }
    }

    pub fn context(&self) -> &BattleContext {
        &self.context
    }

    pub fn battle_id(&self) -> &str {
        self.context.battle_id()
    }

    pub fn client(&self) -> &A2AClient {
        &self.client
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.settings.timeout_policy
    }

    pub fn participant_timeout(&self) -> Duration {
        self.settings.participant_timeout
    }

    pub fn max_turns(&self) -> usize {
        self.settings.max_turns
    }

    pub async fn progress(&self, message: impl Into<String>) {
        self.report(BattleEvent::progress(
            self.battle_id(),
            message,
            &self.settings.reported_by,
        ))
        .await;
    }

    pub async fn progress_with(&self, message: impl Into<String>, detail: Map<String, Value>) {
        self.report(
            BattleEvent::progress(self.battle_id(), message, &self.settings.reported_by)
                .with_detail(detail),
        )
        .await;
    }

    async fn report(&self, event: BattleEvent) {
        log::info!("[battle {}] {}", event.battle_id, event.message);
        self.reporter.report_progress(event).await;
    }

    /// One turn with `participant`, re-sent on timeout as the policy allows.
    pub async fn ask(
        &self,
        participant: &Participant,
        text: &str,
        context_id: Option<&str>,
    ) -> Result<(String, Option<ContextId>), CommunicationError> {
        let mut attempt = 0;
        loop {
            let result = self
                .client
                .send_in_context(&participant.url, text, context_id, self.participant_timeout())
                .await;

            match result {
                Err(e) if e.is_timeout() && attempt < self.policy().retries() => {
                    attempt += 1;
                    self.progress(format!(
                        "{} timed out, retrying ({}/{})",
                        participant.role.as_str(),
                        attempt,
                        self.policy().retries()
                    ))
                    .await;
                }
                other => return other,
            }
        }
    }
}
