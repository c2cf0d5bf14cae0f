//! Assembles a served agent from configuration: executor, tools, remote
//! tool sources and, for the green role, the battle machinery.

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;

use crate::a2a::server::{create_router, A2AState};
use crate::a2a::AgentCard;
use crate::battle::{orchestrator_for, GreenAgent, StartBattleTool};
use crate::config::Config;
use crate::executor::{AgentExecutor, ExecutorConfig};
use crate::providers::{build_provider, LLMProvider};
use crate::reporting::{BackendReporter, LogReporter, Reporter, RetryPolicy};
use crate::tools::echo::EchoTool;
use crate::tools::mcp;
use crate::tools::report_progress::ReportProgressTool;
use crate::types::Role;

/// Where the agent's own tools are served over MCP.
pub const TOOLS_PATH: &str = "/tools";

pub struct AgentApp {
    pub executor: Arc<AgentExecutor>,
    pub card: AgentCard,
    pub green: Option<Arc<GreenAgent>>,
}

impl AgentApp {
    pub async fn build(config: &Config) -> Result<Self> {
        let llm = build_provider(&config.model)?;
        Self::build_with(config, llm).await
    }

    /// Like [`build`](Self::build) with an explicit completion backend.
    pub async fn build_with(config: &Config, llm: Arc<dyn LLMProvider>) -> Result<Self> {
        let mut executor = AgentExecutor::new(llm, ExecutorConfig::from_settings(config))
            .with_reporter(progress_reporter(config));

        executor.register(EchoTool::new())?;
        executor.register(ReportProgressTool::new())?;

        let green = if config.agent.role == Role::Green {
            let orchestrator = orchestrator_for(config.battle.orchestrator);
            log::info!("Green agent judging with the {} orchestrator", orchestrator.name());
            let green = Arc::new(GreenAgent::from_config(config, orchestrator));
            executor.register(StartBattleTool::new(green.clone()))?;
            executor = executor.with_inbound_handler(green.clone());
            Some(green)
        } else {
            None
        };

        for url in &config.executor.mcp_servers {
            match executor.add_remote_source(url).await {
                Ok(added) => log::info!("Loaded {} tool(s) from {}", added.len(), url),
                Err(e) => log::warn!("Skipping tool source {}: {}", url, e),
            }
        }

        let url = config.agent.address().url();
        Ok(Self {
            executor: Arc::new(executor),
            card: AgentCard::from_config(&config.agent, &url),
            green,
        })
    }

    /// The A2A endpoint, with the local tools served over MCP under
    /// [`TOOLS_PATH`].
    pub fn router(&self) -> Router {
        let tools = mcp::router(
            Arc::new(self.executor.local_tools().clone()),
            &self.card.name,
            self.executor.config().tool_timeout,
        );

        create_router(A2AState {
            executor: self.executor.clone(),
            card: Arc::new(self.card.clone()),
        })
        .nest(TOOLS_PATH, tools)
    }

    pub async fn serve(self, config: &Config) -> Result<()> {
        let listener = crate::api::bind(&config.agent.host, config.agent.port).await?;
        let name = format!("{} ({})", self.card.name, config.agent.role.as_str());
        crate::api::serve(self.router(), listener, &name, crate::api::shutdown_signal())
            .await
            .context("Agent server failed")
    }
}

fn progress_reporter(config: &Config) -> Arc<dyn Reporter> {
    match &config.backend.url {
        Some(url) => Arc::new(BackendReporter::new(
            url,
            RetryPolicy::from_config(&config.backend),
            std::time::Duration::from_secs(config.backend.request_timeout_secs),
        )),
        None => Arc::new(LogReporter),
    }
}
