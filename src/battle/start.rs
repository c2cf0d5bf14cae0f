use serde_json::{Map, Value};

use super::BattleError;
use crate::types::{BattleContext, Participant, Role};

const TASK_PREFIX: &str = "Task description:";

/// A parsed `battle_start` message.
#[derive(Debug, Clone)]
pub struct BattleStart {
    pub battle_id: String,
    pub participants: Vec<Participant>,
    pub task_config: Value,
    pub backend_url: Option<String>,
}

impl BattleStart {
    pub fn parse(text: &str) -> Result<Self, BattleError> {
        let data: Value = serde_json::from_str(text.trim())
            .map_err(|e| BattleError::InvalidStart(format!("invalid_json: {}", e)))?;
        Self::from_value(&data)
    }

    pub fn from_value(data: &Value) -> Result<Self, BattleError> {
        if data.get("type").and_then(Value::as_str) != Some("battle_start") {
            return Err(BattleError::InvalidStart("not_battle_start".to_string()));
        }

        let battle_id = data
            .get("battle_id")
            .and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| BattleError::InvalidStart("missing battle_id".to_string()))?;

        let green = data.get("green_battle_context");
        let backend_url = green
            .and_then(|g| g.get("backend_url"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let task_config = parse_task_config(green.and_then(|g| g.get("task_config")));

        let participants = participants_from(data)?;
        if participants.is_empty() {
            return Err(BattleError::NoParticipants(battle_id));
        }

        Ok(Self {
            battle_id,
            participants,
            task_config,
            backend_url,
        })
    }

    /// The `battle_start` message for this battle, as the backend sends it.
    pub fn to_message(&self) -> Value {
        let opponents: Vec<Value> = self
            .participants
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name.clone().unwrap_or_else(|| format!("{}_agent", p.role.as_str())),
                    "agent_url": p.url,
                    "role": p.role.as_str(),
                })
            })
            .collect();

        serde_json::json!({
            "type": "battle_start",
            "battle_id": self.battle_id,
            "green_battle_context": {
                "backend_url": self.backend_url.clone().unwrap_or_default(),
                "task_config": self.task_config,
            },
            "opponent_infos": opponents,
        })
    }

    /// `configured_backend` wins over the one named in the message.
    pub fn into_context(self, configured_backend: Option<&str>) -> BattleContext {
        let backend = configured_backend
            .map(str::to_string)
            .or(self.backend_url);
        BattleContext::new(self.battle_id, self.participants)
            .with_task_config(self.task_config)
            .with_backend_url(backend)
    }
}

struct Claim {
    url: String,
    role: Option<Role>,
    name: Option<String>,
}

fn claims_from(data: &Value) -> Vec<Claim> {
    let named_role = |v: &Value| v.get("role").and_then(Value::as_str).and_then(Role::from_str);

    if let Some(contexts) = data
        .get("red_battle_contexts")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
    {
        return contexts
            .iter()
            .map(|(url, ctx)| Claim {
                url: url.clone(),
                role: named_role(ctx),
                name: None,
            })
            .collect();
    }

    data.get("opponent_infos")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|info| {
            let url = info.get("agent_url").and_then(Value::as_str)?;
            Some(Claim {
                url: url.to_string(),
                role: named_role(info),
                name: info.get("name").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

/// Named roles are honoured first; unnamed participants take the free roles
/// in participant order. Two claims on one role reject the payload.
fn participants_from(data: &Value) -> Result<Vec<Participant>, BattleError> {
    let claims = claims_from(data);

    let mut taken: Vec<Role> = Vec::new();
    for role in claims.iter().filter_map(|c| c.role) {
        if role == Role::Green {
            return Err(BattleError::InvalidStart("green is not a participant role".to_string()));
        }
        if taken.contains(&role) {
            return Err(BattleError::InvalidStart(format!(
                "role {} claimed twice",
                role.as_str()
            )));
        }
        taken.push(role);
    }

    let mut free = Role::participant_order()
        .into_iter()
        .filter(|r| !taken.contains(r));
    let mut participants = Vec::with_capacity(claims.len());
    for claim in claims {
        let role = match claim.role.or_else(|| free.next()) {
            Some(role) => role,
            None => {
                return Err(BattleError::InvalidStart(format!(
                    "no role left for {}",
                    claim.url
                )))
            }
        };
        let mut participant = Participant::new(role, claim.url);
        if let Some(name) = claim.name {
            participant = participant.with_name(name);
        }
        participants.push(participant);
    }
    Ok(participants)
}

/// Object, JSON string, `Task description:` prefixed string, or a bare task
/// index. Anything else becomes `{}`.
pub fn parse_task_config(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => {
            let mut text = s.trim();
            if let Some(stripped) = text.strip_prefix(TASK_PREFIX) {
                text = stripped.trim();
            }
            if text.is_empty() {
                return Value::Object(Map::new());
            }
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Value::Object(map),
                Ok(Value::Number(n)) => serde_json::json!({ "task_ids": [n] }),
                _ => Value::Object(Map::new()),
            }
        }
        _ => Value::Object(Map::new()),
    }
}

/// Shallow merge: keys in `overrides` replace those in `defaults`.
pub fn merge_config(defaults: &Value, overrides: &Value) -> Value {
    let mut merged = defaults.as_object().cloned().unwrap_or_default();
    if let Some(overrides) = overrides.as_object() {
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}
