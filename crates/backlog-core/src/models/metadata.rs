//! Sync metadata model

use serde::{Deserialize, Serialize};

use crate::db::{IndexValue, Record, Table};

/// Key of the singleton metadata row
pub const SYNC_METADATA_KEY: &str = "sync_metadata";

/// Aggregate sync health, read by the host and written by the engine
///
/// The counts are a projection refreshed after each run; consumers that
/// need exact numbers ask the queue instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMetadata {
    pub last_sync: Option<i64>,
    pub pending_count: usize,
    pub conflict_count: usize,
    pub error_count: usize,
    pub is_online: bool,
    pub last_online_check: Option<i64>,
    pub total_offline_actions: u64,
    pub successful_syncs: u64,
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            last_sync: None,
            pending_count: 0,
            conflict_count: 0,
            error_count: 0,
            is_online: true,
            last_online_check: None,
            total_offline_actions: 0,
            successful_syncs: 0,
        }
    }
}

impl Record for SyncMetadata {
    const TABLE: Table = Table::SyncMetadata;

    fn key(&self) -> String {
        SYNC_METADATA_KEY.to_string()
    }

    fn index_value(&self, _index: &str) -> Option<IndexValue> {
        None
    }
}
