//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::operation::{OperationId, PendingOperation, SyncAction};
use crate::db::{IndexValue, Record, Table};

/// How a conflict was (or is to be) settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Local data overwrites the remote
    Local,
    /// Remote data replaces the local snapshot
    Server,
    /// A merged payload is sent instead
    Merge,
    /// Waiting for a person to decide
    Manual,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Server => "server",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision supplied when settling an open conflict
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictDecision {
    KeepLocal,
    AcceptServer,
    Merge(serde_json::Value),
}

impl ConflictDecision {
    pub const fn resolution(&self) -> Resolution {
        match self {
            Self::KeepLocal => Resolution::Local,
            Self::AcceptServer => Resolution::Server,
            Self::Merge(_) => Resolution::Merge,
        }
    }
}

/// Recorded clash between a queued operation and the remote state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_id: String,
    pub operation_id: OperationId,
    pub action: SyncAction,
    pub entity_type: String,
    pub entity_id: String,
    /// Payload the operation tried to send
    pub local_data: serde_json::Value,
    /// Body returned with the conflict status, if any
    pub server_data: Option<serde_json::Value>,
    pub resolution: Resolution,
    pub message: String,
    pub created_at: i64,
    /// Unset while the conflict is open
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
}

impl ConflictResolution {
    /// Open conflict for `operation`, awaiting a manual decision
    pub fn detected(
        operation: &PendingOperation,
        server_data: Option<serde_json::Value>,
        message: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            conflict_id: Uuid::now_v7().to_string(),
            operation_id: operation.id,
            action: operation.action,
            entity_type: operation.entity_type.clone(),
            entity_id: operation.entity_id.clone(),
            local_data: operation.payload.clone(),
            server_data,
            resolution: Resolution::Manual,
            message: message.into(),
            created_at: now_ms,
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

impl Record for ConflictResolution {
    const TABLE: Table = Table::Conflicts;

    fn key(&self) -> String {
        self.conflict_id.clone()
    }

    fn index_value(&self, index: &str) -> Option<IndexValue> {
        match index {
            "entity_type" => Some(self.entity_type.as_str().into()),
            "is_open" => Some(self.is_open().into()),
            "created_at" => Some(self.created_at.into()),
            _ => None,
        }
    }
}
