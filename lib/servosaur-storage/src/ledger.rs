use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{Entity, ForeignKey};

/// How a ledger record came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerAction {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub action: LedgerAction,
    pub type_name: String,
    pub entity: Entity,
}

/// Rows created or updated so far in one batch, most recent first.
///
/// Every record is pushed to the front, so iteration order is newest to
/// oldest, both across instructions and across the rows of one instruction.
#[derive(Debug, Default)]
pub struct Ledger {
    records: VecDeque<LedgerRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: LedgerAction, entity: Entity) {
        self.records.push_front(LedgerRecord {
            action,
            type_name: entity.type_name().to_string(),
            entity,
        });
    }

    /// Value of the referenced field on the most recently created entity of
    /// the referenced type, or null when this batch created none.
    ///
    /// Updates never satisfy a reference.
    pub fn resolve(&self, foreign_key: &ForeignKey) -> JsonValue {
        self.records
            .iter()
            .find(|r| r.action == LedgerAction::Create && r.type_name == foreign_key.target_type)
            .and_then(|r| r.entity.get(&foreign_key.target_field).cloned())
            .unwrap_or(JsonValue::Null)
    }

    /// Records, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<LedgerRecord> {
        self.records.into()
    }
}
