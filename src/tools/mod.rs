pub mod echo;
pub mod mcp;
pub mod registry;
pub mod report_progress;
pub mod schema;

pub use registry::ToolRegistry;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{BattleEvent, BattleId, ContextId};

#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub conversation_id: Option<ContextId>,
    pub battle_id: Option<BattleId>,
    /// Identity used when a tool reports on behalf of the agent.
    pub agent_name: String,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    pub side_effects: Vec<SideEffect>,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            side_effects: vec![],
        }
    }

    pub fn failed(output: Value) -> Self {
        Self {
            success: false,
            output,
            side_effects: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub enum SideEffect {
    ProgressReported(BattleEvent),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, context: &ToolContext) -> Result<ToolResult>;
}

pub struct ToolCall {
    pub name: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    Local,
    Remote { url: String },
}

/// A registered tool: name, schema, description and the callable behind them.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub source: ToolSource,
    callable: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn local(tool: impl Tool + 'static) -> Self {
        Self::from_tool(Arc::new(tool), ToolSource::Local)
    }

    pub fn from_tool(tool: Arc<dyn Tool>, source: ToolSource) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            source,
            callable: tool,
        }
    }

    pub fn callable(&self) -> &Arc<dyn Tool> {
        &self.callable
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, ToolSource::Remote { .. })
    }

    pub fn schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    Execution { tool: String, reason: String },

    #[error("Tool {tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
}

impl ToolError {
    pub fn kind(&self) -> &str {
        match self {
            ToolError::DuplicateName(_) => "duplicate_name",
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::Execution { .. } => "execution_failed",
            ToolError::Timeout { .. } => "timeout",
        }
    }

    /// Structured failure handed back to the conversation instead of a crash.
    pub fn to_observation(&self) -> Value {
        json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}
