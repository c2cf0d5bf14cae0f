use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProcessState;

/// Externally visible identity of a supervised agent. Survives resets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentAddress {
    pub host: String,
    pub port: u16,
}

impl AgentAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRecord {
    pub pid: u32,
    pub code: Option<i32>,
    pub description: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the one agent process a supervisor owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub state: ProcessState,
    #[serde(flatten)]
    pub address: AgentAddress,
    pub pid: Option<u32>,
    /// Incremented every time a child is spawned.
    pub generation: u64,
    pub restarts: u64,
    pub last_exit: Option<ExitRecord>,
}

impl ProcessStatus {
    pub fn stopped(address: AgentAddress) -> Self {
        Self {
            state: ProcessState::Stopped,
            address,
            pid: None,
            generation: 0,
            restarts: 0,
            last_exit: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}
