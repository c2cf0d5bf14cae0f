use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;
}

const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// POSTs `body` and decodes a JSON reply, turning non-2xx answers into
/// errors that carry the provider's own message.
async fn post_completion<B: Serialize, R: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<R> {
    let response = request
        .json(body)
        .send()
        .await
        .with_context(|| format!("{} request failed", provider))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("{} returned HTTP {}: {}", provider, status, text);
    }
    response
        .json()
        .await
        .with_context(|| format!("{} returned an unreadable completion", provider))
}

/// Chat turns in wire shape: role plus text.
#[derive(Debug, Serialize, Deserialize)]
struct WireTurn {
    role: String,
    content: String,
}

impl From<Message> for WireTurn {
    fn from(m: Message) -> Self {
        Self {
            role: m.role,
            content: m.content,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<WireTurn>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "claude-3-5-sonnet-20240620".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client: http_client(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// System turns travel in their own field; several are joined.
    fn split_system(messages: Vec<Message>) -> (Option<String>, Vec<WireTurn>) {
        let (system, turns): (Vec<Message>, Vec<Message>) =
            messages.into_iter().partition(|m| m.role == "system");
        let system = (!system.is_empty()).then(|| {
            system
                .into_iter()
                .map(|m| m.content)
                .collect::<Vec<_>>()
                .join("\n\n")
        });
        (system, turns.into_iter().map(WireTurn::from).collect())
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let (system, turns) = Self::split_system(messages);
        let body = AnthropicRequest {
            model: self.model.clone(),
            messages: turns,
            max_tokens: self.max_tokens,
            system,
        };

        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");
        let reply: AnthropicResponse = post_completion("Anthropic", request, &body).await?;

        let text: String = reply.content.into_iter().filter_map(|b| b.text).collect();
        if text.is_empty() {
            bail!("Anthropic completion had no text");
        }
        Ok(text)
    }
}

/// Any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<WireTurn>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: WireTurn,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client: http_client(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let body = OpenAIRequest {
            model: self.model.clone(),
            messages: messages.into_iter().map(WireTurn::from).collect(),
            max_tokens: self.max_tokens,
        };

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        let reply: OpenAIResponse = post_completion("OpenAI", request, &body).await?;

        reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI completion had no choices"))
    }
}

/// Replays canned responses in order, repeating the last one once the queue
/// runs dry. Drives participants in local runs and tests.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
        }
    }

    pub fn with_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        let next = self
            .responses
            .lock()
            .map_err(|_| anyhow!("scripted provider lock poisoned"))?
            .pop_front();

        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow!("scripted provider lock poisoned"))?;
        match next {
            Some(response) => {
                *last = Some(response.clone());
                Ok(response)
            }
            None => last
                .clone()
                .ok_or_else(|| anyhow!("Scripted provider has no responses")),
        }
    }
}

/// Stands in when no model is configured; every completion fails.
pub struct UnconfiguredProvider;

#[async_trait]
impl LLMProvider for UnconfiguredProvider {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        Err(anyhow!("No language model configured for this agent"))
    }
}
