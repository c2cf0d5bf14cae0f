use futures::future::join_all;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::{
    A2AEvent, A2AMessage, AgentCard, CommunicationError, MessageSendParams, RpcRequest,
    RpcResponse, CARD_PATH, NO_RESPONSE,
};
use crate::types::ContextId;

/// One directed message: target, payload and how to deliver it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub target: String,
    pub text: String,
    pub context_id: Option<ContextId>,
    pub streaming: bool,
}

impl OutboundMessage {
    pub fn new(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target: target.into().trim_end_matches('/').to_string(),
            text: text.into(),
            context_id: None,
            streaming: false,
        }
    }

    pub fn in_context(mut self, context_id: Option<ContextId>) -> Self {
        self.context_id = context_id;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Reply text and the conversation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub context_id: Option<ContextId>,
}

#[derive(Debug, Clone)]
pub struct A2AClient {
    client: reqwest::Client,
    health_check_timeout: Duration,
}

impl Default for A2AClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl A2AClient {
    pub fn new(health_check_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            health_check_timeout,
        }
    }

    pub async fn send(
        &self,
        target: &str,
        message: &str,
        timeout: Duration,
    ) -> Result<String, CommunicationError> {
        let reply = self
            .dispatch(&OutboundMessage::new(target, message), timeout)
            .await?;
        Ok(reply.text)
    }

    /// Continues the conversation `context_id` (or opens one) and returns the
    /// reply with the context id the peer used.
    pub async fn send_in_context(
        &self,
        target: &str,
        message: &str,
        context_id: Option<&str>,
        timeout: Duration,
    ) -> Result<(String, Option<ContextId>), CommunicationError> {
        let outbound =
            OutboundMessage::new(target, message).in_context(context_id.map(str::to_string));
        let reply = self.dispatch(&outbound, timeout).await?;
        Ok((reply.text, reply.context_id))
    }

    pub async fn send_streaming(
        &self,
        target: &str,
        message: &str,
        timeout: Duration,
    ) -> Result<String, CommunicationError> {
        let reply = self
            .dispatch(&OutboundMessage::new(target, message).streaming(true), timeout)
            .await?;
        Ok(reply.text)
    }

    /// Same message to every target, concurrently. Returns once each target
    /// has answered or failed; results are keyed by target.
    pub async fn send_broadcast(
        &self,
        targets: &[String],
        message: &str,
        timeout: Duration,
    ) -> BTreeMap<String, Result<String, CommunicationError>> {
        self.send_distinct(
            targets.iter().map(|t| (t.clone(), message.to_string())),
            timeout,
        )
        .await
    }

    pub async fn send_distinct(
        &self,
        targets_with_messages: impl IntoIterator<Item = (String, String)>,
        timeout: Duration,
    ) -> BTreeMap<String, Result<String, CommunicationError>> {
        let mut seen = BTreeSet::new();
        let messages: Vec<OutboundMessage> = targets_with_messages
            .into_iter()
            .map(|(target, text)| OutboundMessage::new(target, text))
            .filter(|m| {
                let fresh = seen.insert(m.target.clone());
                if !fresh {
                    log::debug!("Skipping duplicate target {}", m.target);
                }
                fresh
            })
            .collect();

        let sends = messages.iter().map(|m| async move {
            let result = self.dispatch(m, timeout).await.map(|reply| reply.text);
            (m.target.clone(), result)
        });

        join_all(sends).await.into_iter().collect()
    }

    /// Delivers one message under `timeout`. Nothing outlives the deadline.
    pub async fn dispatch(
        &self,
        message: &OutboundMessage,
        timeout: Duration,
    ) -> Result<Reply, CommunicationError> {
        let target = message.target.clone();
        log::debug!("A2A -> {} ({} chars)", target, message.text.len());

        let exchange = async {
            if message.streaming {
                self.exchange_streaming(message).await
            } else {
                self.exchange(message).await
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if let Err(e) = &result {
                    log::warn!("A2A call failed: {}", e);
                }
                result
            }
            Err(_) => {
                log::warn!("A2A call to {} timed out after {:?}", target, timeout);
                Err(CommunicationError::Timeout {
                    target,
                    after: timeout,
                })
            }
        }
    }

    async fn exchange(&self, message: &OutboundMessage) -> Result<Reply, CommunicationError> {
        let response = self.post_rpc(message, "message/send").await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&message.target, e))?;

        let rpc: RpcResponse = serde_json::from_str(&body).map_err(|e| CommunicationError::Protocol {
            target: message.target.clone(),
            reason: format!("invalid JSON-RPC response: {}", e),
        })?;
        let event = unwrap_rpc(&message.target, rpc)?;

        let text = event.text();
        Ok(Reply {
            text: if text.trim().is_empty() {
                NO_RESPONSE.to_string()
            } else {
                text
            },
            context_id: event.context_id().map(str::to_string),
        })
    }

    async fn exchange_streaming(
        &self,
        message: &OutboundMessage,
    ) -> Result<Reply, CommunicationError> {
        let response = self.post_rpc(message, "message/stream").await?;

        let mut chunks: Vec<String> = Vec::new();
        let mut context_id = None;
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        'read: while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| transport_error(&message.target, e))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(end) = buffer.find('\n') {
                let line: String = buffer.drain(..=end).collect();
                let Some(data) = line.trim_end().strip_prefix("data:") else {
                    continue;
                };
                let Ok(rpc) = serde_json::from_str::<RpcResponse>(data.trim()) else {
                    log::debug!("Skipping unparsable stream line from {}", message.target);
                    continue;
                };
                let event = unwrap_rpc(&message.target, rpc)?;

                if context_id.is_none() {
                    context_id = event.context_id().map(str::to_string);
                }
                let text = event.text();
                if !text.is_empty() {
                    chunks.push(text);
                }
                if event.is_final() {
                    break 'read;
                }
            }
        }

        let text = chunks.join("").trim().to_string();
        Ok(Reply {
            text: if text.is_empty() {
                NO_RESPONSE.to_string()
            } else {
                text
            },
            context_id,
        })
    }

    async fn post_rpc(
        &self,
        message: &OutboundMessage,
        method: &str,
    ) -> Result<reqwest::Response, CommunicationError> {
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(uuid::Uuid::new_v4().to_string()),
            method: method.to_string(),
            params: serde_json::to_value(MessageSendParams {
                message: A2AMessage::user(message.text.clone(), message.context_id.clone()),
            })
            .unwrap_or(Value::Null),
        };

        let response = self
            .client
            .post(format!("{}/", message.target))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&message.target, e))?;

        if !response.status().is_success() {
            return Err(CommunicationError::Protocol {
                target: message.target.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(response)
    }

    pub async fn fetch_card(&self, url: &str) -> Result<AgentCard, CommunicationError> {
        let target = url.trim_end_matches('/').to_string();
        let fetch = async {
            let response = self
                .client
                .get(format!("{}{}", target, CARD_PATH))
                .send()
                .await
                .map_err(|e| transport_error(&target, e))?;
            if !response.status().is_success() {
                return Err(CommunicationError::Protocol {
                    target: target.clone(),
                    reason: format!("agent card returned HTTP {}", response.status()),
                });
            }
            response
                .json::<AgentCard>()
                .await
                .map_err(|e| CommunicationError::Protocol {
                    target: target.clone(),
                    reason: format!("invalid agent card: {}", e),
                })
        };

        tokio::time::timeout(self.health_check_timeout, fetch)
            .await
            .unwrap_or_else(|_| {
                Err(CommunicationError::Timeout {
                    target: target.clone(),
                    after: self.health_check_timeout,
                })
            })
    }

    pub async fn check_health(&self, url: &str) -> bool {
        match self.fetch_card(url).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

fn unwrap_rpc(target: &str, rpc: RpcResponse) -> Result<A2AEvent, CommunicationError> {
    if let Some(error) = rpc.error {
        return Err(CommunicationError::Remote {
            target: target.to_string(),
            code: error.code,
            message: error.message,
        });
    }
    rpc.result.ok_or_else(|| CommunicationError::Protocol {
        target: target.to_string(),
        reason: "response has neither result nor error".to_string(),
    })
}

fn transport_error(target: &str, e: reqwest::Error) -> CommunicationError {
    if e.is_timeout() {
        CommunicationError::Timeout {
            target: target.to_string(),
            after: Duration::ZERO,
        }
    } else {
        CommunicationError::Connection {
            target: target.to_string(),
            reason: e.to_string(),
        }
    }
}
