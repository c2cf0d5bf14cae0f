use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::BattleError;
use crate::types::{BattleId, BattleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleTransition {
    Start,
    Report,
    Abort,
}

pub struct BattleStateMachine;

impl BattleStateMachine {
    pub fn transition(state: BattleState, event: BattleTransition) -> Result<BattleState, BattleError> {
        let next = match (state, event) {
            (BattleState::NotStarted, BattleTransition::Start) => BattleState::InProgress,
            (BattleState::InProgress, BattleTransition::Report) => BattleState::Reported,
            (BattleState::NotStarted | BattleState::InProgress, BattleTransition::Abort) => {
                BattleState::Aborted
            }
            _ => return Err(BattleError::InvalidTransition { from: state, event }),
        };
        Ok(next)
    }
}

/// Process-wide record of battle states, keyed by battle id. A battle moves
/// to a terminal state here before its terminal event is delivered, so a
/// second terminal attempt is refused without touching the backend.
///
/// Entries are never evicted: one small record per battle for the life of
/// the process, since forgetting an id would reopen its terminal slot.
#[derive(Debug, Clone, Default)]
pub struct BattleLedger {
    battles: Arc<RwLock<HashMap<BattleId, BattleState>>>,
    undelivered: Arc<RwLock<HashSet<BattleId>>>,
}

impl BattleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The claimed state. A terminal state here means the slot is taken;
    /// whether the event reached the backend is [`BattleLedger::is_delivered`].
    pub fn state(&self, battle_id: &str) -> BattleState {
        self.battles
            .read()
            .unwrap()
            .get(battle_id)
            .copied()
            .unwrap_or(BattleState::NotStarted)
    }

    pub fn begin(&self, battle_id: &str) -> Result<(), BattleError> {
        self.apply(battle_id, BattleTransition::Start).map(|_| ())
    }

    /// Claims the single terminal slot of `battle_id`.
    pub fn close(&self, battle_id: &str, event: BattleTransition) -> Result<BattleState, BattleError> {
        self.apply(battle_id, event).map_err(|e| match e {
            BattleError::InvalidTransition { from, .. } if from.is_terminal() => {
                BattleError::AlreadyReported(battle_id.to_string())
            }
            other => other,
        })
    }

    /// Marks the terminal event of `battle_id` as never delivered. The
    /// terminal slot stays claimed.
    pub fn mark_undelivered(&self, battle_id: &str) {
        self.undelivered.write().unwrap().insert(battle_id.to_string());
    }

    /// True once a terminal state is claimed and its delivery did not fail.
    pub fn is_delivered(&self, battle_id: &str) -> bool {
        self.state(battle_id).is_terminal()
            && !self.undelivered.read().unwrap().contains(battle_id)
    }

    fn apply(&self, battle_id: &str, event: BattleTransition) -> Result<BattleState, BattleError> {
        let mut battles = self.battles.write().unwrap();
        let current = battles
            .get(battle_id)
            .copied()
            .unwrap_or(BattleState::NotStarted);

        let next = BattleStateMachine::transition(current, event)?;
        battles.insert(battle_id.to_string(), next);
        Ok(next)
    }

    pub fn len(&self) -> usize {
        self.battles.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
