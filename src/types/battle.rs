use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{BattleId, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub role: Role,
    pub url: String,
    pub name: Option<String>,
}

impl Participant {
    pub fn new(role: Role, url: impl Into<String>) -> Self {
        Self {
            role,
            url: url.into().trim_end_matches('/').to_string(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Everything a battle run is scoped by. Built once when the battle starts
/// and only read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleContext {
    battle_id: BattleId,
    participants: BTreeMap<Role, Participant>,
    task_config: Value,
    backend_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl BattleContext {
    pub fn new(battle_id: impl Into<BattleId>, participants: Vec<Participant>) -> Self {
        Self {
            battle_id: battle_id.into(),
            participants: participants.into_iter().map(|p| (p.role, p)).collect(),
            task_config: Value::Object(Default::default()),
            backend_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_task_config(mut self, task_config: Value) -> Self {
        self.task_config = task_config;
        self
    }

    pub fn with_backend_url(mut self, backend_url: Option<String>) -> Self {
        self.backend_url = backend_url.filter(|u| !u.is_empty());
        self
    }

    pub fn battle_id(&self) -> &str {
        &self.battle_id
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant(&self, role: Role) -> Option<&Participant> {
        self.participants.get(&role)
    }

    /// The participant of a single-opponent battle.
    pub fn first_participant(&self) -> Option<&Participant> {
        self.participants.values().next()
    }

    pub fn role_of(&self, url: &str) -> Option<Role> {
        let url = url.trim_end_matches('/');
        self.participants
            .values()
            .find(|p| p.url == url)
            .map(|p| p.role)
    }

    pub fn participant_urls(&self) -> Vec<String> {
        self.participants.values().map(|p| p.url.clone()).collect()
    }

    pub fn task_config(&self) -> &Value {
        &self.task_config
    }

    pub fn backend_url(&self) -> Option<&str> {
        self.backend_url.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_participants_keyed_by_role() {
        let ctx = BattleContext::new(
            "b-1",
            vec![
                Participant::new(Role::Red, "http://localhost:9002/"),
                Participant::new(Role::White, "http://localhost:9001"),
            ],
        );

        assert_eq!(ctx.battle_id(), "b-1");
        assert_eq!(ctx.participant(Role::Red).unwrap().url, "http://localhost:9002");
        assert_eq!(ctx.role_of("http://localhost:9001/"), Some(Role::White));
        assert_eq!(ctx.first_participant().unwrap().role, Role::White);
        assert_eq!(ctx.participant_urls().len(), 2);
    }

    #[test]
    fn test_empty_backend_url_is_ignored() {
        let ctx = BattleContext::new("b-2", vec![])
            .with_backend_url(Some(String::new()))
            .with_task_config(json!({"task_ids": [1]}));

        assert!(ctx.backend_url().is_none());
        assert_eq!(ctx.task_config()["task_ids"][0], 1);
    }
}
