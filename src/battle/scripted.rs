use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

use super::start::merge_config;
use super::tags::parse_tags;
use super::{BattleSession, Orchestrator, TimeoutPolicy, Verdict};
use crate::types::{Outcome, Role};

pub const RESPOND_ACTION: &str = "respond";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStep {
    pub prompt: String,
    /// Case-insensitive substring the answer must contain.
    #[serde(default)]
    pub expect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub kwargs: Value,
}

impl Action {
    /// Text the action contributes as an answer.
    pub fn answer(&self) -> String {
        if self.name == RESPOND_ACTION {
            if let Some(content) = self.kwargs.get("content").and_then(Value::as_str) {
                return content.to_string();
            }
        }
        format!("{} {}", self.name, self.kwargs)
    }
}

/// Pulls the `<json>` action out of a participant reply.
pub fn parse_action(reply: &str) -> Result<Action> {
    let tags = parse_tags(reply);
    let raw = tags
        .get("json")
        .ok_or_else(|| anyhow!("reply has no <json> action"))?;
    serde_json::from_str(raw).map_err(|e| anyhow!("invalid action JSON: {}", e))
}

#[derive(Debug, Clone, Serialize)]
struct TurnRecord {
    turn: usize,
    passed: bool,
    answer: Option<String>,
    error: Option<String>,
}

/// Multi-turn evaluation of a single participant within one conversation.
/// Each step is sent in turn; the participant wins only if every step passes.
pub struct ScriptedEvaluation {
    defaults: Value,
}

impl Default for ScriptedEvaluation {
    fn default() -> Self {
        Self::new(vec![EvaluationStep {
            prompt: "Reply with the word ready.".to_string(),
            expect: Some("ready".to_string()),
        }])
    }
}

impl ScriptedEvaluation {
    pub fn new(steps: Vec<EvaluationStep>) -> Self {
        Self {
            defaults: json!({
                "intro": "You are being evaluated. Answer each user message.",
                "steps": steps,
            }),
        }
    }

    fn steps(config: &Value) -> Result<Vec<EvaluationStep>> {
        let steps: Vec<EvaluationStep> = serde_json::from_value(
            config.get("steps").cloned().unwrap_or_else(|| json!([])),
        )
        .map_err(|e| anyhow!("invalid steps in task config: {}", e))?;
        if steps.is_empty() {
            return Err(anyhow!("task config has no evaluation steps"));
        }
        Ok(steps)
    }

    fn task_description(intro: &str, first_prompt: &str) -> String {
        format!(
            "{}\nPlease respond in JSON wrapped with <json>...</json> tags.\n\
             The JSON should contain:\n\
             - \"name\": a tool name, or \"{}\" to answer directly.\n\
             - \"kwargs\": the tool arguments, or {{\"content\": \"your message\"}} to answer directly.\n\n\
             User message: {}",
            intro, RESPOND_ACTION, first_prompt
        )
    }
}

#[async_trait]
impl Orchestrator for ScriptedEvaluation {
    fn name(&self) -> &str {
        "scripted_evaluation"
    }

    async fn run(&self, session: &BattleSession) -> Result<Verdict> {
        let started = Instant::now();
        let participant = session
            .context()
            .first_participant()
            .cloned()
            .ok_or_else(|| anyhow!("no participant to evaluate"))?;

        let config = merge_config(&self.defaults, session.context().task_config());
        let steps = Self::steps(&config)?;
        let intro = config
            .get("intro")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut turns: Vec<TurnRecord> = Vec::new();
        let mut context_id: Option<String> = None;
        let mut timed_out = false;

        for (index, step) in steps.iter().enumerate().take(session.max_turns()) {
            let turn = index + 1;
            let message = if index == 0 {
                Self::task_description(&intro, &step.prompt)
            } else {
                format!("User message:\n{}", step.prompt)
            };

            let reply = match session.ask(&participant, &message, context_id.as_deref()).await {
                Ok(reply) => reply,
                Err(e) => {
                    timed_out = e.is_timeout();
                    session.progress(format!("Turn {}: {}", turn, e)).await;
                    turns.push(TurnRecord {
                        turn,
                        passed: false,
                        answer: None,
                        error: Some(e.to_string()),
                    });
                    break;
                }
            };

            let (text, reply_context) = reply;
            let switched = matches!(
                (&context_id, &reply_context),
                (Some(expected), Some(actual)) if expected != actual
            );
            if switched {
                session
                    .progress(format!("Turn {}: participant switched conversation", turn))
                    .await;
                turns.push(TurnRecord {
                    turn,
                    passed: false,
                    answer: None,
                    error: Some("context id changed mid-conversation".to_string()),
                });
                break;
            }
            if context_id.is_none() {
                context_id = reply_context;
            }

            let record = match parse_action(&text) {
                Ok(action) => {
                    let answer = action.answer();
                    let passed = step
                        .expect
                        .as_ref()
                        .map(|e| answer.to_lowercase().contains(&e.to_lowercase()))
                        .unwrap_or(true);
                    TurnRecord {
                        turn,
                        passed,
                        answer: Some(answer),
                        error: None,
                    }
                }
                Err(e) => TurnRecord {
                    turn,
                    passed: false,
                    answer: Some(text.clone()),
                    error: Some(e.to_string()),
                },
            };

            let mut detail = Map::new();
            detail.insert("turn".to_string(), json!(turn));
            detail.insert("passed".to_string(), json!(record.passed));
            session
                .progress_with(
                    format!("Turn {}: {}", turn, if record.passed { "passed" } else { "failed" }),
                    detail,
                )
                .await;
            turns.push(record);
        }

        let success = turns.len() == steps.len() && turns.iter().all(|t| t.passed);
        let winner = if success {
            Outcome::winner(participant.role)
        } else if timed_out && session.policy() == TimeoutPolicy::Draw {
            Outcome::draw()
        } else {
            Outcome::winner(Role::Green)
        };

        let time_used = started.elapsed().as_secs_f64();
        let mut detail = Map::new();
        detail.insert("success".to_string(), json!(success));
        detail.insert("time_used".to_string(), json!(time_used));
        detail.insert("turns".to_string(), json!(turns.len()));
        detail.insert("participant_url".to_string(), json!(participant.url));
        detail.insert("task_config".to_string(), config.clone());
        detail.insert("records".to_string(), json!(turns));

        let mut markdown = format!(
            "## Evaluation of {}\n\n| Turn | Result |\n|---|---|\n",
            participant.role.as_str()
        );
        for t in &turns {
            markdown.push_str(&format!(
                "| {} | {} |\n",
                t.turn,
                if t.passed { "pass" } else { "fail" }
            ));
        }
        markdown.push_str(&format!(
            "\n**Success:** {}  \n**Time used:** {:.2}s\n",
            if success { "yes" } else { "no" },
            time_used
        ));

        Ok(Verdict::new(winner, "Evaluation completed")
            .with_detail(detail)
            .with_markdown(markdown))
    }
}
