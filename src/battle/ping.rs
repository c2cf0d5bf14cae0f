use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map};

use super::{BattleSession, Orchestrator, Verdict};
use crate::types::Role;

/// Sends `ping` to every participant at once and rewards whoever answers.
pub struct PingOrchestrator {
    message: String,
}

impl Default for PingOrchestrator {
    fn default() -> Self {
        Self {
            message: "ping".to_string(),
        }
    }
}

impl PingOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Orchestrator for PingOrchestrator {
    fn name(&self) -> &str {
        "ping"
    }

    async fn run(&self, session: &BattleSession) -> Result<Verdict> {
        let context = session.context();
        let mut pending: Vec<String> = context.participant_urls();
        let mut replies = Map::new();
        let mut responders: Vec<Role> = Vec::new();
        let mut silent: Vec<Role> = Vec::new();

        let rounds = 1 + session.policy().retries();
        for round in 0..rounds {
            if pending.is_empty() {
                break;
            }
            if round > 0 {
                session
                    .progress(format!("Retrying {} silent participant(s)", pending.len()))
                    .await;
            }

            let results = session
                .client()
                .send_distinct(
                    pending.iter().map(|url| (url.clone(), self.message.clone())),
                    session.participant_timeout(),
                )
                .await;

            pending.clear();
            for (url, result) in results {
                let Some(role) = context.role_of(&url) else {
                    continue;
                };
                match result {
                    Ok(text) => {
                        session
                            .progress_with(
                                format!("{} replied", role.as_str()),
                                Map::from_iter([("reply".to_string(), json!(text))]),
                            )
                            .await;
                        replies.insert(role.as_str().to_string(), json!(text));
                        responders.push(role);
                    }
                    Err(e) if e.is_timeout() && round + 1 < rounds => {
                        pending.push(url);
                    }
                    Err(e) => {
                        session
                            .progress(format!("{} failed to reply: {}", role.as_str(), e))
                            .await;
                        replies.insert(
                            role.as_str().to_string(),
                            json!({ "error": e.to_string(), "timeout": e.is_timeout() }),
                        );
                        silent.push(role);
                    }
                }
            }
        }

        responders.sort();
        silent.sort();
        let winner = session.policy().resolve(&responders, &silent);

        let message = if silent.is_empty() {
            "All participants replied".to_string()
        } else {
            format!(
                "No reply from {}",
                silent.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
            )
        };

        let mut detail = Map::new();
        detail.insert("replies".to_string(), json!(replies));
        detail.insert(
            "responders".to_string(),
            json!(responders.iter().map(Role::as_str).collect::<Vec<_>>()),
        );
        detail.insert(
            "silent".to_string(),
            json!(silent.iter().map(Role::as_str).collect::<Vec<_>>()),
        );

        Ok(Verdict::new(winner, message).with_detail(detail))
    }
}
