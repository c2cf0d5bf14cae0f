use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use super::{Reporter, ReportingError};
use crate::types::BattleEvent;

/// In-memory reporter. Keeps every accepted event in arrival order.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<RwLock<Vec<BattleEvent>>>,
    failing_terminals: Arc<AtomicU32>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` terminal deliveries fail as exhausted.
    pub fn fail_terminals(self, n: u32) -> Self {
        self.failing_terminals.store(n, Ordering::SeqCst);
        self
    }

    pub fn events(&self) -> Vec<BattleEvent> {
        self.events.read().unwrap().clone()
    }

    pub fn events_for(&self, battle_id: &str) -> Vec<BattleEvent> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.battle_id == battle_id)
            .cloned()
            .collect()
    }

    pub fn terminal_events(&self, battle_id: &str) -> Vec<BattleEvent> {
        self.events_for(battle_id)
            .into_iter()
            .filter(BattleEvent::is_terminal)
            .collect()
    }

    pub fn progress_events(&self, battle_id: &str) -> Vec<BattleEvent> {
        self.events_for(battle_id)
            .into_iter()
            .filter(|e| !e.is_terminal())
            .collect()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report_progress(&self, event: BattleEvent) {
        self.events.write().unwrap().push(event);
    }

    async fn report_terminal(&self, event: BattleEvent) -> Result<(), ReportingError> {
        let should_fail = self
            .failing_terminals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ReportingError::Exhausted {
                attempts: 1,
                last_error: "recording reporter configured to fail".to_string(),
            });
        }

        self.events.write().unwrap().push(event);
        Ok(())
    }
}
