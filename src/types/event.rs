use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::{BattleId, Role};

/// Winner label of a terminal event. Open set: role labels, `draw`, and
/// `no_result` are conventional, anything else passes through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(String);

impl Outcome {
    pub const DRAW: &'static str = "draw";
    pub const NO_RESULT: &'static str = "no_result";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn winner(role: Role) -> Self {
        Self(format!("{}_agent", role.as_str()))
    }

    pub fn draw() -> Self {
        Self(Self::DRAW.to_string())
    }

    pub fn no_result() -> Self {
        Self(Self::NO_RESULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn role(&self) -> Option<Role> {
        Role::from_str(&self.0)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    Progress,
    Terminal { winner: Outcome },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleEvent {
    pub battle_id: BattleId,
    pub kind: EventKind,
    pub message: String,
    pub reported_by: String,
    pub detail: Option<Map<String, Value>>,
    pub markdown_content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BattleEvent {
    pub fn progress(
        battle_id: impl Into<BattleId>,
        message: impl Into<String>,
        reported_by: impl Into<String>,
    ) -> Self {
        Self {
            battle_id: battle_id.into(),
            kind: EventKind::Progress,
            message: message.into(),
            reported_by: reported_by.into(),
            detail: None,
            markdown_content: None,
            timestamp: Utc::now(),
        }
    }

    pub fn terminal(
        battle_id: impl Into<BattleId>,
        winner: Outcome,
        message: impl Into<String>,
        reported_by: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Terminal { winner },
            ..Self::progress(battle_id, message, reported_by)
        }
    }

    pub fn with_detail(mut self, detail: Map<String, Value>) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Merges a single key into the detail map, creating it if needed.
    pub fn with_detail_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.detail
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_content(mut self, markdown: impl Into<String>) -> Self {
        self.markdown_content = Some(markdown.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Terminal { .. })
    }

    pub fn winner(&self) -> Option<&Outcome> {
        match &self.kind {
            EventKind::Terminal { winner } => Some(winner),
            EventKind::Progress => None,
        }
    }
}
