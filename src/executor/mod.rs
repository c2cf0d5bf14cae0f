pub mod audit;
pub mod conversation;

pub use audit::{AuditLog, ToolAuditRecord};
pub use conversation::{Conversation, ConversationStore};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::providers::{LLMProvider, Message};
use crate::reporting::Reporter;
use crate::tools::mcp::{RemoteSourceError, RemoteToolSource};
use crate::tools::{SideEffect, Tool, ToolCall, ToolContext, ToolDescriptor, ToolError, ToolRegistry};
use crate::types::{BattleId, ContextId};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum tool-call rounds per incoming message
    pub max_tool_calls: usize,
    pub tool_timeout: Duration,
    pub remote_timeout: Duration,
    pub system_prompt: Option<String>,
    /// Identity used as `reported_by` for tool-emitted progress
    pub agent_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            tool_timeout: Duration::from_secs(60),
            remote_timeout: Duration::from_secs(30),
            system_prompt: None,
            agent_name: "colosseum_agent".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_settings(config: &Config) -> Self {
        Self {
            max_tool_calls: config.executor.max_tool_calls,
            tool_timeout: Duration::from_secs(config.executor.tool_timeout_secs),
            remote_timeout: Duration::from_secs(config.executor.remote_timeout_secs),
            system_prompt: config.executor.system_prompt.clone(),
            agent_name: config.agent.name.clone(),
        }
    }
}

/// Incremental output of one message, for streaming responses.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Working(String),
    ToolFinished { tool: String, success: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorReply {
    pub context_id: ContextId,
    pub text: String,
}

/// Gets the first look at every incoming message. Returning `Some` answers
/// the message directly; `None` hands it to the model.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, text: &str, context: &ToolContext) -> Result<Option<String>>;
}

pub struct AgentExecutor {
    config: ExecutorConfig,
    llm: Arc<dyn LLMProvider>,
    local: ToolRegistry,
    remote: ToolRegistry,
    sources: Vec<RemoteToolSource>,
    reporter: Option<Arc<dyn Reporter>>,
    inbound: Option<Arc<dyn InboundHandler>>,
    conversations: ConversationStore,
    audit: AuditLog,
}

impl AgentExecutor {
    pub fn new(llm: Arc<dyn LLMProvider>, config: ExecutorConfig) -> Self {
        Self {
            config,
            llm,
            local: ToolRegistry::new(),
            remote: ToolRegistry::new(),
            sources: Vec::new(),
            reporter: None,
            inbound: None,
            conversations: ConversationStore::new(),
            audit: AuditLog::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_inbound_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.inbound = Some(handler);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn register_tool(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        self.local.register(descriptor)?;
        Ok(())
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_tool(ToolDescriptor::local(tool))
    }

    /// Connects to a remote tool provider and merges its tools into the
    /// effective set. Names already provided locally, or by an earlier
    /// source, are skipped. On error the executor is left unchanged.
    pub async fn add_remote_source(&mut self, url: &str) -> Result<Vec<String>, RemoteSourceError> {
        let source = RemoteToolSource::connect(url, self.config.remote_timeout)
            .await
            .map_err(|e| {
                log::warn!("Remote tool source unavailable, continuing with local tools: {}", e);
                e
            })?;

        let mut added = Vec::new();
        for descriptor in source.descriptors() {
            if self.local.contains(&descriptor.name) || self.remote.contains(&descriptor.name) {
                log::warn!(
                    "Skipping remote tool '{}' from {}: name already provided",
                    descriptor.name,
                    url
                );
                continue;
            }
            let name = descriptor.name.clone();
            if self.remote.register(descriptor).is_ok() {
                added.push(name);
            }
        }

        log::info!(
            "Connected remote tool source {} ({}): {} tools",
            url,
            source.server_name().unwrap_or("unnamed"),
            added.len()
        );
        self.sources.push(source);
        Ok(added)
    }

    pub fn remote_sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(RemoteToolSource::url)
    }

    /// Local tools first, then remote tools not shadowed by them.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names = self.local.names();
        names.extend(
            self.remote
                .names()
                .into_iter()
                .filter(|n| !self.local.contains(n)),
        );
        names
    }

    pub fn tool_schemas(&self) -> Vec<Value> {
        let mut schemas = self.local.get_schemas();
        schemas.extend(self.remote.get_schemas());
        schemas
    }

    pub fn local_tools(&self) -> &ToolRegistry {
        &self.local
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub async fn handle_message(
        &self,
        conversation_id: Option<&str>,
        text: &str,
    ) -> Result<ExecutorReply> {
        self.run(conversation_id, text, None).await
    }

    pub async fn handle_message_streaming(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        events: mpsc::Sender<ExecutorEvent>,
    ) -> Result<ExecutorReply> {
        self.run(conversation_id, text, Some(&events)).await
    }

    async fn run(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        events: Option<&mpsc::Sender<ExecutorEvent>>,
    ) -> Result<ExecutorReply> {
        let handle = self.conversations.open(conversation_id);
        let mut conversation = handle.lock().await;

        if let Some(battle_id) = extract_battle_id(text) {
            conversation.battle_id = Some(battle_id);
        }
        let context = ToolContext {
            conversation_id: Some(conversation.id.clone()),
            battle_id: conversation.battle_id.clone(),
            agent_name: self.config.agent_name.clone(),
        };

        if let Some(inbound) = &self.inbound {
            if let Some(reply) = inbound.handle(text, &context).await? {
                conversation.messages.push(Message::user(text));
                conversation.messages.push(Message::assistant(reply.clone()));
                return Ok(ExecutorReply {
                    context_id: conversation.id.clone(),
                    text: reply,
                });
            }
        }

        let mut messages = Vec::with_capacity(conversation.messages.len() + 2);
        messages.push(Message::system(self.system_prompt()));
        messages.extend(conversation.messages.iter().cloned());
        messages.push(Message::user(text));
        let history_start = messages.len() - 1;

        let mut rounds = 0;
        let reply = loop {
            let response = self.llm.complete(messages.clone()).await?;
            let calls = parse_tool_calls(&response);
            if calls.is_empty() {
                break response;
            }

            rounds += 1;
            if rounds > self.config.max_tool_calls {
                return Err(anyhow!(
                    "Exceeded maximum tool call rounds ({})",
                    self.config.max_tool_calls
                ));
            }

            let mut observations = Vec::with_capacity(calls.len());
            for call in calls {
                notify(events, ExecutorEvent::Working(format!("Calling tool {}", call.name))).await;
                let (success, observation) = self.invoke_tool(&call, &context).await;
                notify(
                    events,
                    ExecutorEvent::ToolFinished {
                        tool: call.name.clone(),
                        success,
                    },
                )
                .await;
                observations.push(format!(
                    "Tool {} result: {}",
                    call.name,
                    serde_json::to_string(&observation)?
                ));
            }

            messages.push(Message::assistant(response));
            messages.push(Message::user(format!(
                "Tool execution results:\n{}",
                observations.join("\n")
            )));
        };

        messages.push(Message::assistant(reply.clone()));
        conversation
            .messages
            .extend(messages.into_iter().skip(history_start));

        Ok(ExecutorReply {
            context_id: conversation.id.clone(),
            text: reply,
        })
    }

    fn system_prompt(&self) -> String {
        let base = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| format!("You are {}.", self.config.agent_name));

        let schemas = self.tool_schemas();
        if schemas.is_empty() {
            return base;
        }
        let listing = serde_json::to_string_pretty(&schemas).unwrap_or_default();
        format!(
            "{}\n\nAvailable tools:\n{}\n\nTo call a tool, reply with a line of the form \
             {{\"tool\": \"<name>\", \"params\": {{...}}}}. Reply without such a line to answer.",
            base, listing
        )
    }

    /// Runs a resolved call exactly once. Failures come back as a structured
    /// observation rather than an error.
    pub async fn invoke_tool(&self, call: &ToolCall, context: &ToolContext) -> (bool, Value) {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();

        let registry = if self.local.contains(&call.name) {
            &self.local
        } else {
            &self.remote
        };
        let outcome = registry
            .execute(call, context, self.config.tool_timeout)
            .await;

        let (success, observation) = match outcome {
            Ok(result) => {
                for effect in result.side_effects {
                    self.apply(effect).await;
                }
                if result.success {
                    (true, result.output)
                } else {
                    (
                        false,
                        json!({ "error": "tool_failed", "output": result.output }),
                    )
                }
            }
            Err(e) => {
                let prefix = context
                    .battle_id
                    .as_ref()
                    .map(|id| format!("[battle {}] ", id))
                    .unwrap_or_default();
                log::warn!(target: "colosseum::tools", "{}{}", prefix, e);
                (false, e.to_observation())
            }
        };

        self.audit.record(ToolAuditRecord {
            tool: call.name.clone(),
            battle_id: context.battle_id.clone(),
            conversation_id: context.conversation_id.clone(),
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            success,
        });

        (success, observation)
    }

    async fn apply(&self, effect: SideEffect) {
        match effect {
            SideEffect::ProgressReported(event) => match &self.reporter {
                Some(reporter) => reporter.report_progress(event).await,
                None => log::info!("[battle {}] {}", event.battle_id, event.message),
            },
        }
    }
}

async fn notify(events: Option<&mpsc::Sender<ExecutorEvent>>, event: ExecutorEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

/// Lines of the form `{"tool": "<name>", "params": {...}}`.
pub fn parse_tool_calls(response: &str) -> Vec<ToolCall> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.contains("\"tool\""))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|parsed| {
            let name = parsed.get("tool")?.as_str()?.to_string();
            let params = parsed.get("params").cloned().unwrap_or_else(|| json!({}));
            Some(ToolCall { name, params })
        })
        .collect()
}

/// Battle id carried by a JSON message, e.g. a battle_start payload.
fn extract_battle_id(text: &str) -> Option<BattleId> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()?
        .get("battle_id")?
        .as_str()
        .map(str::to_string)
}
