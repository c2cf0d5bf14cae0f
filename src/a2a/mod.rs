//! Agent-to-agent messaging: JSON-RPC 2.0 wire types, the outbound client
//! and the conversational endpoint served by every agent.

pub mod client;
pub mod server;

pub use client::{A2AClient, OutboundMessage};
pub use server::{create_router, A2AState};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const CARD_PATH: &str = "/.well-known/agent.json";
pub const NO_RESPONSE: &str = "No response from agent.";

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

/// Failure of a single outbound call. Every variant names its target so a
/// fan-out caller can attribute it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommunicationError {
    #[error("{target} did not respond within {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("Connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("Unexpected response from {target}: {reason}")]
    Protocol { target: String, reason: String },

    #[error("{target} returned error {code}: {message}")]
    Remote {
        target: String,
        code: i32,
        message: String,
    },
}

impl CommunicationError {
    pub fn target(&self) -> &str {
        match self {
            CommunicationError::Timeout { target, .. }
            | CommunicationError::Connection { target, .. }
            | CommunicationError::Protocol { target, .. }
            | CommunicationError::Remote { target, .. } => target,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommunicationError::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Part {
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

fn join_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            Part::Unsupported => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2AMessage {
    pub role: String,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl A2AMessage {
    pub fn user(text: impl Into<String>, context_id: Option<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            context_id,
        }
    }

    pub fn agent(text: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            role: "agent".to_string(),
            parts: vec![Part::text(text)],
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            context_id: Some(context_id.into()),
        }
    }

    pub fn text(&self) -> String {
        join_text(&self.parts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Canceled,
    Failed,
    Rejected,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<A2AMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactUpdate {
    pub context_id: String,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// `result` of a `message/send` response or one `message/stream` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum A2AEvent {
    Message(A2AMessage),
    Task(Task),
    StatusUpdate(StatusUpdate),
    ArtifactUpdate(ArtifactUpdate),
}

impl A2AEvent {
    pub fn context_id(&self) -> Option<&str> {
        match self {
            A2AEvent::Message(m) => m.context_id.as_deref(),
            A2AEvent::Task(t) => Some(&t.context_id),
            A2AEvent::StatusUpdate(s) => Some(&s.context_id),
            A2AEvent::ArtifactUpdate(a) => Some(&a.context_id),
        }
    }

    /// Text carried by the event, if any.
    pub fn text(&self) -> String {
        match self {
            A2AEvent::Message(m) => m.text(),
            A2AEvent::Task(t) => {
                let artifacts: String = t.artifacts.iter().map(|a| join_text(&a.parts)).collect();
                if artifacts.is_empty() {
                    t.status.message.as_ref().map(A2AMessage::text).unwrap_or_default()
                } else {
                    artifacts
                }
            }
            A2AEvent::StatusUpdate(s) => s.status.message.as_ref().map(A2AMessage::text).unwrap_or_default(),
            A2AEvent::ArtifactUpdate(a) => join_text(&a.artifact.parts),
        }
    }

    pub fn is_final(&self) -> bool {
        match self {
            A2AEvent::StatusUpdate(s) => s.is_final,
            A2AEvent::Message(_) | A2AEvent::Task(_) => true,
            A2AEvent::ArtifactUpdate(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: A2AMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<A2AEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: A2AEvent) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

fn default_capabilities() -> AgentCapabilities {
    AgentCapabilities { streaming: false }
}

impl AgentCard {
    pub fn from_config(agent: &crate::config::AgentConfig, url: &str) -> Self {
        let skills = agent
            .skills
            .iter()
            .map(|skill| AgentSkill {
                id: skill.clone(),
                name: skill.replace('_', " "),
                description: String::new(),
                tags: vec![agent.role.as_str().to_string()],
            })
            .collect();

        Self {
            name: agent.name.clone(),
            description: agent.description.clone(),
            url: url.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: AgentCapabilities {
                streaming: agent.streaming,
            },
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            skills,
        }
    }
}
