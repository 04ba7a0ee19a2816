//! Cached reference data

use serde::{Deserialize, Serialize};

use crate::db::{IndexValue, Record, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub fetched_at: i64,
    pub expires_at: i64,
}

impl ReferenceEntry {
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

impl Record for ReferenceEntry {
    const TABLE: Table = Table::ReferenceCache;

    fn key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }

    fn index_value(&self, index: &str) -> Option<IndexValue> {
        match index {
            "entity_type" => Some(self.entity_type.as_str().into()),
            "expires_at" => Some(self.expires_at.into()),
            _ => None,
        }
    }
}
