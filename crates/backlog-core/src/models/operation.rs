//! Pending operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{IndexValue, Record, Table};
use crate::error::Error;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Mutation replayed against the remote authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Priority used when the caller does not pick one
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::Delete => Priority::Critical,
            Self::Create => Priority::High,
            Self::Update => Priority::Normal,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown action: {other}"))),
        }
    }
}

/// Scheduling priority; lower value runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

impl Priority {
    pub const fn value(self) -> i64 {
        self as i64
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "1" => Ok(Self::Critical),
            "high" | "2" => Ok(Self::High),
            "normal" | "3" => Ok(Self::Normal),
            "low" | "4" => Ok(Self::Low),
            other => Err(Error::InvalidInput(format!("unknown priority: {other}"))),
        }
    }
}

/// Per-enqueue overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A queued, retryable unit of sync work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub action: SyncAction,
    /// Opaque tag selecting the remote collection and payload codec
    pub entity_type: String,
    /// May be a client-generated temporary id for creates
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Not attempted before this time (Unix ms)
    pub next_retry_at: i64,
    pub created_at: i64,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
    /// Set while a detected conflict awaits resolution
    pub conflict_id: Option<String>,
}

impl PendingOperation {
    /// Whether the retry budget is spent
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub const fn is_conflicted(&self) -> bool {
        self.conflict_id.is_some()
    }

    /// Whether the item may be executed at `now_ms`
    pub const fn is_ready(&self, now_ms: i64) -> bool {
        !self.is_exhausted() && !self.is_conflicted() && self.next_retry_at <= now_ms
    }
}

impl Record for PendingOperation {
    const TABLE: Table = Table::PendingOperations;

    fn key(&self) -> String {
        self.id.as_str()
    }

    fn index_value(&self, index: &str) -> Option<IndexValue> {
        match index {
            "priority" => Some(self.priority.value().into()),
            "entity_type" => Some(self.entity_type.as_str().into()),
            "next_retry_at" => Some(self.next_retry_at.into()),
            "attempts" => Some(self.attempts.into()),
            "created_at" => Some(self.created_at.into()),
            "entity_id" => Some(self.entity_id.as_str().into()),
            "conflicted" => Some(self.is_conflicted().into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation(attempts: u32, next_retry_at: i64) -> PendingOperation {
        PendingOperation {
            id: OperationId::new(),
            action: SyncAction::Update,
            entity_type: "price".to_string(),
            entity_id: "p-1".to_string(),
            payload: serde_json::json!({"amount": 3}),
            priority: Priority::Normal,
            attempts,
            max_attempts: 3,
            next_retry_at,
            created_at: 0,
            last_attempt_at: None,
            last_error: None,
            conflict_id: None,
        }
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_default_priority_by_action() {
        assert_eq!(SyncAction::Delete.default_priority(), Priority::Critical);
        assert_eq!(SyncAction::Create.default_priority(), Priority::High);
        assert_eq!(SyncAction::Update.default_priority(), Priority::Normal);
    }

    #[test]
    fn test_priority_orders_by_value() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::Low.value(), 4);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_ready_rules() {
        assert!(operation(0, 100).is_ready(100));
        assert!(!operation(0, 101).is_ready(100));
        assert!(!operation(3, 0).is_ready(i64::MAX));

        let mut conflicted = operation(0, 0);
        conflicted.conflict_id = Some("c-1".to_string());
        assert!(!conflicted.is_ready(i64::MAX));
    }

    #[test]
    fn test_action_round_trips_through_str() {
        for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
            assert_eq!(action.as_str().parse::<SyncAction>().unwrap(), action);
        }
    }
}
