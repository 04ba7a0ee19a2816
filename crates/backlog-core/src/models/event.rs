//! Audit event model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::db::{IndexValue, Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Enqueued,
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    OperationSynced,
    OperationFailed,
    ConflictDetected,
    ConflictResolved,
    Cleanup,
    ConnectivityChanged,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::SyncStarted => "sync_started",
            Self::SyncCompleted => "sync_completed",
            Self::SyncFailed => "sync_failed",
            Self::OperationSynced => "operation_synced",
            Self::OperationFailed => "operation_failed",
            Self::ConflictDetected => "conflict_detected",
            Self::ConflictResolved => "conflict_resolved",
            Self::Cleanup => "cleanup",
            Self::ConnectivityChanged => "connectivity_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub kind: EventKind,
    pub timestamp: i64,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: EventKind, timestamp: i64, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            timestamp,
            entity_type: None,
            entity_id: None,
            details,
        }
    }

    #[must_use]
    pub fn for_entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }
}

impl Record for AuditEvent {
    const TABLE: Table = Table::Events;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn index_value(&self, index: &str) -> Option<IndexValue> {
        match index {
            "timestamp" => Some(self.timestamp.into()),
            "kind" => Some(self.kind.as_str().into()),
            _ => None,
        }
    }
}
