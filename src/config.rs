use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{AgentAddress, Role};

pub const ENV_PREFIX: &str = "COLOSSEUM_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub launcher: LauncherConfig,
    pub a2a: A2AConfig,
    pub executor: ExecutorSettings,
    pub model: ModelConfig,
    pub backend: BackendConfig,
    pub battle: BattleSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub description: String,
    pub role: Role,
    pub host: String,
    pub port: u16,
    pub streaming: bool,
    pub skills: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "colosseum_agent".to_string(),
            description: "Battle participant served over A2A".to_string(),
            role: Role::White,
            host: "localhost".to_string(),
            port: 9001,
            streaming: true,
            skills: vec![],
        }
    }
}

impl AgentConfig {
    pub fn address(&self) -> AgentAddress {
        AgentAddress::new(self.host.clone(), self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub host: String,
    pub port: u16,
    /// Program to supervise; defaults to this binary.
    pub command: Option<String>,
    /// `{host}` and `{port}` are substituted with the agent address.
    pub args: Vec<String>,
    pub grace_period_ms: u64,
    pub probe_attempts: u32,
    pub probe_interval_ms: u64,
    pub probe_connect_timeout_ms: u64,
    pub auto_restart_on_crash: bool,
    pub notify_url: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9100,
            command: None,
            args: vec![
                "serve".to_string(),
                "--host".to_string(),
                "{host}".to_string(),
                "--port".to_string(),
                "{port}".to_string(),
            ],
            grace_period_ms: 5_000,
            probe_attempts: 50,
            probe_interval_ms: 200,
            probe_connect_timeout_ms: 500,
            auto_restart_on_crash: false,
            notify_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct A2AConfig {
    pub message_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
}

impl Default for A2AConfig {
    fn default() -> Self {
        Self {
            message_timeout_secs: 300,
            health_check_timeout_secs: 5,
        }
    }
}

impl A2AConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_tool_calls: usize,
    pub tool_timeout_secs: u64,
    pub remote_timeout_secs: u64,
    pub mcp_servers: Vec<String>,
    pub system_prompt: Option<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            tool_timeout_secs: 60,
            remote_timeout_secs: 30,
            mcp_servers: vec![],
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `openai`, `anthropic`, `scripted` or `none`.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub scripted_responses: Vec<String>,
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    #[serde(skip)]
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub reported_by: String,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub retry_multiplier: f64,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            reported_by: "Green Agent".to_string(),
            retry_max_attempts: 5,
            retry_initial_backoff_ms: 200,
            retry_max_backoff_ms: 5_000,
            retry_multiplier: 2.0,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicyKind {
    Forfeit,
    Draw,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorKind {
    Ping,
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleSettings {
    pub orchestrator: OrchestratorKind,
    pub participant_timeout_secs: u64,
    pub timeout_policy: TimeoutPolicyKind,
    pub retry_attempts: u32,
    pub max_turns: usize,
}

impl Default for BattleSettings {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorKind::Scripted,
            participant_timeout_secs: 300,
            timeout_policy: TimeoutPolicyKind::Forfeit,
            retry_attempts: 1,
            max_turns: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults plus environment overrides; no file involved.
    pub fn from_env() -> Result<Self> {
        Self::from_toml_str("", std::env::vars()).context("Invalid COLOSSEUM_* environment overrides")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Config file not found: {}", path.display()))?;
        Self::from_toml_str(&text, std::env::vars())
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml_str(
        text: &str,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(text).context("Invalid TOML syntax")?;
        apply_env_overrides(&mut table, env);

        let mut config: Config = toml::Value::Table(table).try_into()?;
        config.load_secrets();
        config.validate()?;
        Ok(config)
    }

    fn load_secrets(&mut self) {
        self.model.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        self.model.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.port == 0 {
            bail!("agent.port must be set");
        }
        if self.launcher.probe_attempts == 0 {
            bail!("launcher.probe_attempts must be at least 1");
        }
        if self.backend.retry_max_attempts == 0 {
            bail!("backend.retry_max_attempts must be at least 1");
        }
        if self.a2a.message_timeout_secs == 0 || self.a2a.health_check_timeout_secs == 0 {
            bail!("a2a timeouts must be non-zero");
        }
        if self.executor.tool_timeout_secs == 0 || self.executor.remote_timeout_secs == 0 {
            bail!("executor timeouts must be non-zero");
        }
        if self.battle.participant_timeout_secs == 0 {
            bail!("battle.participant_timeout_secs must be non-zero");
        }
        if self.backend.retry_multiplier < 1.0 {
            bail!("backend.retry_multiplier must be >= 1.0");
        }
        Ok(())
    }
}

/// `COLOSSEUM_SECTION_FIELD=value` overrides `section.field`. Section names
/// never contain underscores, so the first segment is always the section.
pub fn apply_env_overrides(
    table: &mut toml::Table,
    env: impl IntoIterator<Item = (String, String)>,
) {
    for (key, raw) in env {
        let Some(path) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path = path.to_ascii_lowercase();
        let Some((section, field)) = path.split_once('_') else {
            continue;
        };
        if field.is_empty() {
            continue;
        }

        let entry = table
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(section_table) = entry {
            let value = if LIST_FIELDS.contains(&(section, field)) {
                parse_env_list(&raw)
            } else {
                parse_env_value(&raw)
            };
            section_table.insert(field.to_string(), value);
        }
    }
}

/// Fields that also take a comma-separated list, e.g. MCP server URLs.
const LIST_FIELDS: &[(&str, &str)] = &[("executor", "mcp_servers"), ("agent", "skills")];

fn parse_env_list(raw: &str) -> toml::Value {
    match parse_env_value(raw) {
        toml::Value::String(s) => toml::Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| toml::Value::String(item.to_string()))
                .collect(),
        ),
        other => other,
    }
}

fn parse_env_value(raw: &str) -> toml::Value {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return toml::Value::Float(f);
    }
    if let Ok(b) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if trimmed.starts_with('[') {
        if let Ok(mut wrapper) = toml::from_str::<toml::Table>(&format!("v = {}", trimmed)) {
            if let Some(value) = wrapper.remove("v") {
                return value;
            }
        }
    }
    toml::Value::String(trimmed.to_string())
}
