pub mod battle;
pub mod event;
pub mod process;

pub use battle::{BattleContext, Participant};
pub use event::{BattleEvent, EventKind, Outcome};
pub use process::{AgentAddress, ExitRecord, ProcessStatus};

use serde::{Deserialize, Serialize};

pub type BattleId = String;
pub type ContextId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,    // No child
    Starting,   // Spawned, readiness probe pending
    Running,    // Accepting connections
    Restarting, // Reset in flight
    Crashed,    // Exited without being asked to
}

impl ProcessState {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Restarting => "restarting",
            ProcessState::Crashed => "crashed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Green,
    White,
    Red,
    Blue,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Green => "green",
            Role::White => "white",
            Role::Red => "red",
            Role::Blue => "blue",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" | "green_agent" => Some(Role::Green),
            "white" | "white_agent" => Some(Role::White),
            "red" | "red_agent" => Some(Role::Red),
            "blue" | "blue_agent" => Some(Role::Blue),
            _ => None,
        }
    }

    /// Roles handed out to participants that do not name one.
    pub fn participant_order() -> [Role; 3] {
        [Role::White, Role::Red, Role::Blue]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleState {
    NotStarted,
    InProgress,
    Reported,
    Aborted,
}

impl BattleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BattleState::Reported | BattleState::Aborted)
    }
}
