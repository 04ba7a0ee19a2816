//! Sync orchestrator.
//!
//! [`SyncEngine`] drains the pending queue against a [`RemoteAuthority`]:
//! one run at a time, in priority order, in bounded batches, with every
//! outcome recorded durably before the next item starts.
//!
//! [`RemoteAuthority`]: crate::remote::RemoteAuthority

mod auto;
pub mod classify;
mod engine;
mod observer;

pub use auto::AutoSyncHandle;
pub use classify::{classify, Classification, FailureKind};
pub use engine::SyncEngine;
pub use observer::{EngineEvent, SyncCallbacks, SyncObserver};

use std::time::Duration;

use serde::Serialize;

use crate::models::{ConflictResolution, OperationId, SyncAction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Run even when the monitor reports offline
    pub force: bool,
}

impl SyncOptions {
    pub const fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped by [`SyncEngine::abort`]
    Aborted,
}

/// One item that did not sync during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub operation_id: OperationId,
    pub action: SyncAction,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    /// Completed with no failed items; conflicts do not count as failures
    pub success: bool,
    pub status: RunStatus,
    pub synced_count: usize,
    pub error_count: usize,
    pub conflicts: Vec<ConflictResolution>,
    pub errors: Vec<ItemError>,
    pub duration: Duration,
}

/// Point-in-time view for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_enabled: bool,
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: usize,
    pub last_sync: Option<i64>,
    pub next_auto_sync: Option<i64>,
}
