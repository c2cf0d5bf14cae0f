use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::providers::Message;
use crate::types::{BattleId, ContextId};

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ContextId,
    pub messages: Vec<Message>,
    pub battle_id: Option<BattleId>,
}

impl Conversation {
    pub fn new(id: impl Into<ContextId>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            battle_id: None,
        }
    }
}

const DEFAULT_LIMIT: usize = 1024;

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<ContextId, Arc<Mutex<Conversation>>>,
    opened: VecDeque<ContextId>,
}

/// Conversation histories keyed by context id. Each entry has its own lock,
/// so one conversation is handled at a time while others proceed. Past
/// `limit` conversations, the one opened earliest is forgotten.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    entries: Arc<RwLock<Entries>>,
    limit: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            limit: limit.max(1),
        }
    }

    /// Existing conversation for `id`, or a new one. `None` allocates a
    /// fresh id.
    pub fn open(&self, id: Option<&str>) -> Arc<Mutex<Conversation>> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(existing) = self.entries.read().unwrap().by_id.get(&id) {
            return existing.clone();
        }

        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.by_id.get(&id) {
            return existing.clone();
        }
        while entries.by_id.len() >= self.limit {
            let Some(oldest) = entries.opened.pop_front() else {
                break;
            };
            entries.by_id.remove(&oldest);
        }
        let conversation = Arc::new(Mutex::new(Conversation::new(id.clone())));
        entries.by_id.insert(id.clone(), conversation.clone());
        entries.opened.push_back(id);
        conversation
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().unwrap().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        entries.opened.retain(|opened| opened != id);
        entries.by_id.remove(id).is_some()
    }
}
