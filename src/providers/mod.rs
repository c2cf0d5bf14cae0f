pub mod llm;

pub use llm::{
    AnthropicProvider, LLMProvider, Message, OpenAIProvider, ScriptedProvider,
    UnconfiguredProvider,
};

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::config::ModelConfig;

/// Builds the completion backend named by `[model] provider`.
pub fn build_provider(config: &ModelConfig) -> Result<Arc<dyn LLMProvider>> {
    let provider = config.provider.as_deref().unwrap_or("none");

    let built: Arc<dyn LLMProvider> = match provider {
        "openai" => {
            let Some(key) = config.openai_api_key.clone() else {
                bail!("OPENAI_API_KEY is required for the openai provider");
            };
            let mut p = OpenAIProvider::new(key);
            if let Some(model) = &config.model {
                p = p.with_model(model.clone());
            }
            if let Some(base_url) = &config.base_url {
                p = p.with_base_url(base_url.clone());
            }
            Arc::new(p)
        }
        "anthropic" => {
            let Some(key) = config.anthropic_api_key.clone() else {
                bail!("ANTHROPIC_API_KEY is required for the anthropic provider");
            };
            let mut p = AnthropicProvider::new(key);
            if let Some(model) = &config.model {
                p = p.with_model(model.clone());
            }
            if let Some(base_url) = &config.base_url {
                p = p.with_base_url(base_url.clone());
            }
            Arc::new(p)
        }
        "scripted" => Arc::new(ScriptedProvider::new(config.scripted_responses.clone())),
        "none" => Arc::new(UnconfiguredProvider),
        other => bail!("Unknown model provider: {}", other),
    };

    log::info!("Model provider: {}", provider);
    Ok(built)
}
