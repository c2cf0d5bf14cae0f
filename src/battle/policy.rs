use serde::{Deserialize, Serialize};

use crate::config::{BattleSettings, TimeoutPolicyKind};
use crate::types::{Outcome, Role};

/// What a participant timeout means for the battle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// The silent participant loses.
    #[default]
    Forfeit,
    /// Any timeout ends the battle in a draw.
    Draw,
    /// Re-send up to `attempts` more times, then forfeit.
    Retry { attempts: u32 },
}

impl TimeoutPolicy {
    pub fn from_settings(settings: &BattleSettings) -> Self {
        match settings.timeout_policy {
            TimeoutPolicyKind::Forfeit => TimeoutPolicy::Forfeit,
            TimeoutPolicyKind::Draw => TimeoutPolicy::Draw,
            TimeoutPolicyKind::Retry => TimeoutPolicy::Retry {
                attempts: settings.retry_attempts,
            },
        }
    }

    /// Extra sends allowed after a timeout.
    pub fn retries(&self) -> u32 {
        match self {
            TimeoutPolicy::Retry { attempts } => *attempts,
            TimeoutPolicy::Forfeit | TimeoutPolicy::Draw => 0,
        }
    }

    /// Outcome when some participants answered and others timed out.
    /// `responders` and `silent` together cover every participant.
    pub fn resolve(&self, responders: &[Role], silent: &[Role]) -> Outcome {
        if responders.is_empty() {
            return Outcome::no_result();
        }
        if silent.is_empty() {
            return Outcome::draw();
        }
        match self {
            TimeoutPolicy::Draw => Outcome::draw(),
            TimeoutPolicy::Forfeit | TimeoutPolicy::Retry { .. } => match responders {
                [only] => Outcome::winner(*only),
                _ => Outcome::draw(),
            },
        }
    }
}
