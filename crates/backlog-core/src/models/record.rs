//! Offline record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::{IndexValue, Record, Table};
use crate::error::Error;

/// Sync state of a locally written snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Syncing,
    Synced,
    Conflict,
    Error,
    Retry,
}

impl RecordStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Error => "error",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            "retry" => Ok(Self::Retry),
            other => Err(Error::InvalidInput(format!("unknown record status: {other}"))),
        }
    }
}

/// Domain snapshot written locally before the remote has confirmed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    /// Entity id; shared with the queued operation
    pub id: String,
    pub entity_type: String,
    pub data: serde_json::Value,
    pub status: RecordStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub synced_at: Option<i64>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Id assigned by the remote when it differs from the local one
    pub server_id: Option<String>,
}

impl OfflineRecord {
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        id: impl Into<String>,
        data: serde_json::Value,
        now_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            data,
            status: RecordStatus::Pending,
            created_at: now_ms,
            updated_at: now_ms,
            synced_at: None,
            retry_count: 0,
            last_error: None,
            server_id: None,
        }
    }

    pub fn storage_key(&self) -> String {
        record_key(&self.entity_type, &self.id)
    }
}

/// Key of the record for `(entity_type, id)`
pub fn record_key(entity_type: &str, id: &str) -> String {
    format!("{entity_type}:{id}")
}

impl Record for OfflineRecord {
    const TABLE: Table = Table::OfflineRecords;

    fn key(&self) -> String {
        self.storage_key()
    }

    fn index_value(&self, index: &str) -> Option<IndexValue> {
        match index {
            "entity_type" => Some(self.entity_type.as_str().into()),
            "status" => Some(self.status.as_str().into()),
            "created_at" => Some(self.created_at.into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = OfflineRecord::new("price", "p-1", serde_json::json!({}), 42);
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.created_at, 42);
        assert_eq!(record.storage_key(), "price:p-1");
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Synced".parse::<RecordStatus>().unwrap(), RecordStatus::Synced);
        assert!("done".parse::<RecordStatus>().is_err());
    }
}
