use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::types::{BattleId, ContextId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuditRecord {
    pub tool: String,
    pub battle_id: Option<BattleId>,
    pub conversation_id: Option<ContextId>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}

const DEFAULT_CAPACITY: usize = 10_000;

/// The most recent tool invocations; the oldest record is dropped once
/// `capacity` is reached.
#[derive(Debug, Clone)]
pub struct AuditLog {
    records: Arc<RwLock<VecDeque<ToolAuditRecord>>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, record: ToolAuditRecord) {
        let prefix = record
            .battle_id
            .as_ref()
            .map(|id| format!("[battle {}] ", id))
            .unwrap_or_default();
        log::info!(
            target: "colosseum::tools",
            "{}tool={} success={} duration_ms={}",
            prefix,
            record.tool,
            record.success,
            record.duration_ms
        );
        let mut records = self.records.write().unwrap();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn records(&self) -> Vec<ToolAuditRecord> {
        self.records.read().unwrap().iter().cloned().collect()
    }

    pub fn for_battle(&self, battle_id: &str) -> Vec<ToolAuditRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.battle_id.as_deref() == Some(battle_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
