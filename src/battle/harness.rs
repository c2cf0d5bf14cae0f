use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::{
    BattleError, BattleLedger, BattleSession, BattleTransition, Orchestrator, TimeoutPolicy,
    Verdict,
};
use crate::a2a::A2AClient;
use crate::config::Config;
use crate::reporting::Reporter;
use crate::types::{BattleContext, BattleEvent, BattleId, BattleState, Outcome};

#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub reported_by: String,
    pub participant_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    pub max_turns: usize,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            reported_by: "Green Agent".to_string(),
            participant_timeout: Duration::from_secs(300),
            timeout_policy: TimeoutPolicy::Forfeit,
            max_turns: 30,
        }
    }
}

impl HarnessSettings {
    pub fn from_settings(config: &Config) -> Self {
        Self {
            reported_by: config.backend.reported_by.clone(),
            participant_timeout: Duration::from_secs(config.battle.participant_timeout_secs),
            timeout_policy: TimeoutPolicy::from_settings(&config.battle),
            max_turns: config.battle.max_turns,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BattleSummary {
    pub battle_id: BattleId,
    pub state: BattleState,
    pub winner: Outcome,
    pub message: String,
}

/// Runs orchestrators and owns the terminal record of every battle it
/// starts. Whatever the orchestrator does (returns, fails, panics), exactly
/// one terminal event is attempted per battle id.
#[derive(Clone)]
pub struct BattleHarness {
    ledger: BattleLedger,
    reporter: Arc<dyn Reporter>,
    client: A2AClient,
    settings: HarnessSettings,
}

impl BattleHarness {
    pub fn new(reporter: Arc<dyn Reporter>, client: A2AClient, settings: HarnessSettings) -> Self {
        Self {
            ledger: BattleLedger::new(),
            reporter,
            client,
            settings,
        }
    }

    /// Shares battle bookkeeping with other harnesses in the process.
    pub fn with_ledger(mut self, ledger: BattleLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &BattleLedger {
        &self.ledger
    }

    /// Runs the battle to its terminal event. The battle proceeds on its own
    /// task, so dropping this future does not leave it without a record.
    pub async fn run(
        &self,
        context: BattleContext,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Result<BattleSummary, BattleError> {
        let battle_id = context.battle_id().to_string();
        if context.participants().next().is_none() {
            return Err(BattleError::NoParticipants(battle_id));
        }
        self.ledger.begin(&battle_id).map_err(|_| {
            BattleError::InvalidStart(format!("battle {} was already started", battle_id))
        })?;

        let harness = self.clone();
        let task = tokio::spawn(async move { harness.drive(context, orchestrator).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                // drive() itself never panics past its own guard; this only
                // happens on runtime shutdown.
                let reason = format!("battle task failed: {}", e);
                self.abort(&battle_id, &reason).await
            }
        }
    }

    async fn drive(
        &self,
        context: BattleContext,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Result<BattleSummary, BattleError> {
        let battle_id = context.battle_id().to_string();
        let participants: Vec<String> = context
            .participants()
            .map(|p| format!("{}={}", p.role.as_str(), p.url))
            .collect();
        let session = Arc::new(BattleSession::new(
            context,
            self.client.clone(),
            self.reporter.clone(),
            self.settings.clone(),
        ));

        session
            .progress(format!(
                "Battle started by {} with {}",
                orchestrator.name(),
                participants.join(", ")
            ))
            .await;

        let run_session = session.clone();
        let outcome = tokio::spawn(async move { orchestrator.run(&run_session).await }).await;

        match outcome {
            Ok(Ok(verdict)) => self.report(&battle_id, verdict).await,
            Ok(Err(e)) => {
                log::error!("[battle {}] Orchestrator failed: {:#}", battle_id, e);
                self.abort(&battle_id, &format!("{:#}", e)).await
            }
            Err(e) => {
                log::error!("[battle {}] Orchestrator panicked: {}", battle_id, e);
                self.abort(&battle_id, "orchestrator terminated unexpectedly").await
            }
        }
    }

    async fn report(&self, battle_id: &str, verdict: Verdict) -> Result<BattleSummary, BattleError> {
        let mut event = BattleEvent::terminal(
            battle_id,
            verdict.winner,
            verdict.message,
            &self.settings.reported_by,
        );
        if let Some(detail) = verdict.detail {
            event = event.with_detail(detail);
        }
        if let Some(markdown) = verdict.markdown {
            event = event.with_content(markdown);
        }
        self.finish(event, BattleTransition::Report).await
    }

    /// Forces the Aborted terminal event for a battle still in progress.
    pub async fn abort(&self, battle_id: &str, reason: &str) -> Result<BattleSummary, BattleError> {
        let event = BattleEvent::terminal(
            battle_id,
            Outcome::no_result(),
            format!("Battle aborted: {}", reason),
            &self.settings.reported_by,
        )
        .with_detail_entry("error", json!(reason))
        .with_detail_entry("aborted", json!(true));
        self.finish(event, BattleTransition::Abort).await
    }

    async fn finish(
        &self,
        event: BattleEvent,
        transition: BattleTransition,
    ) -> Result<BattleSummary, BattleError> {
        let state = self.ledger.close(&event.battle_id, transition)?;

        let summary = BattleSummary {
            battle_id: event.battle_id.clone(),
            state,
            winner: event.winner().cloned().unwrap_or_else(Outcome::no_result),
            message: event.message.clone(),
        };

        if let Err(e) = self.reporter.report_terminal(event).await {
            self.ledger.mark_undelivered(&summary.battle_id);
            return Err(BattleError::TerminalUndeliverable {
                battle_id: summary.battle_id,
                reason: e.to_string(),
            });
        }

        log::info!(
            "[battle {}] {:?}: winner={}",
            summary.battle_id,
            summary.state,
            summary.winner
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::BattleSession;
    use crate::reporting::RecordingReporter;
    use crate::types::{Participant, Role};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct Fixed(Outcome);

    #[async_trait]
    impl Orchestrator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn run(&self, session: &BattleSession) -> Result<Verdict> {
            session.progress("halfway").await;
            Ok(Verdict::new(self.0.clone(), "decided"))
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
            Err(anyhow!("environment setup failed"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Orchestrator for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn run(&self, _session: &BattleSession) -> Result<Verdict> {
            panic!("scoring bug");
        }
    }

    fn context(id: &str) -> BattleContext {
        BattleContext::new(id, vec![Participant::new(Role::White, "http://127.0.0.1:1")])
    }

    fn harness(reporter: &RecordingReporter) -> BattleHarness {
        BattleHarness::new(
            Arc::new(reporter.clone()),
            A2AClient::default(),
            HarnessSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_verdict_reported_once() {
        let reporter = RecordingReporter::new();
        let summary = harness(&reporter)
            .run(context("b1"), Arc::new(Fixed(Outcome::winner(Role::White))))
            .await
            .unwrap();

        assert_eq!(summary.state, BattleState::Reported);
        let terminals = reporter.terminal_events("b1");
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].winner().unwrap().as_str(), "white_agent");
        assert_eq!(reporter.progress_events("b1").len(), 2);
    }

    #[tokio::test]
    async fn test_error_becomes_aborted_terminal() {
        let reporter = RecordingReporter::new();
        let summary = harness(&reporter)
            .run(context("b2"), Arc::new(Failing))
            .await
            .unwrap();

        assert_eq!(summary.state, BattleState::Aborted);
        let terminals = reporter.terminal_events("b2");
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].winner(), Some(&Outcome::no_result()));
        assert!(terminals[0].message.contains("environment setup failed"));
    }

    #[tokio::test]
    async fn test_panic_becomes_aborted_terminal() {
        let reporter = RecordingReporter::new();
        let summary = harness(&reporter)
            .run(context("b3"), Arc::new(Panicking))
            .await
            .unwrap();

        assert_eq!(summary.state, BattleState::Aborted);
        assert_eq!(reporter.terminal_events("b3").len(), 1);
    }

    #[tokio::test]
    async fn test_second_terminal_refused() {
        let reporter = RecordingReporter::new();
        let harness = harness(&reporter);
        harness
            .run(context("b4"), Arc::new(Fixed(Outcome::draw())))
            .await
            .unwrap();

        let err = harness.abort("b4", "late failure").await.unwrap_err();
        assert!(matches!(err, BattleError::AlreadyReported(_)));
        assert_eq!(reporter.terminal_events("b4").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_battle_id_rejected() {
        let reporter = RecordingReporter::new();
        let harness = harness(&reporter);
        harness
            .run(context("b5"), Arc::new(Fixed(Outcome::draw())))
            .await
            .unwrap();

        let err = harness
            .run(context("b5"), Arc::new(Fixed(Outcome::draw())))
            .await
            .unwrap_err();
        assert!(matches!(err, BattleError::InvalidStart(_)));
        assert_eq!(reporter.terminal_events("b5").len(), 1);
    }

    #[tokio::test]
    async fn test_undeliverable_terminal_escalated() {
        let reporter = RecordingReporter::new().fail_terminals(1);
        let harness = harness(&reporter);
        let err = harness
            .run(context("b6"), Arc::new(Fixed(Outcome::draw())))
            .await
            .unwrap_err();

        assert!(matches!(err, BattleError::TerminalUndeliverable { .. }));
        assert_eq!(harness.ledger().state("b6"), BattleState::Reported);
        assert!(!harness.ledger().is_delivered("b6"));
    }

    #[tokio::test]
    async fn test_no_participants() {
        let reporter = RecordingReporter::new();
        let err = harness(&reporter)
            .run(BattleContext::new("b7", vec![]), Arc::new(Fixed(Outcome::draw())))
            .await
            .unwrap_err();

        assert!(matches!(err, BattleError::NoParticipants(_)));
        assert!(reporter.events().is_empty());
    }
}
