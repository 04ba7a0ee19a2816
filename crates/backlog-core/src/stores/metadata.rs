//! Sync metadata singleton

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{DurableStore, IndexRange};
use crate::error::Result;
use crate::models::{ConflictResolution, SyncMetadata, SYNC_METADATA_KEY};
use crate::queue::PendingQueue;

/// Reads and writes the single `sync_metadata` row
#[derive(Clone)]
pub struct MetadataManager {
    store: DurableStore,
    clock: Arc<dyn Clock>,
}

impl MetadataManager {
    pub fn new(store: DurableStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current metadata, defaults when never written
    pub async fn get(&self) -> Result<SyncMetadata> {
        Ok(self
            .store
            .get::<SyncMetadata>(SYNC_METADATA_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn update(&self, apply: impl FnOnce(&mut SyncMetadata)) -> Result<SyncMetadata> {
        let mut metadata = self.get().await?;
        apply(&mut metadata);
        self.store.put(&metadata).await?;
        Ok(metadata)
    }

    /// Recompute the cached counts from the queue and conflict tables
    pub async fn refresh(&self, queue: &PendingQueue) -> Result<SyncMetadata> {
        let stats = queue.stats().await?;
        let open_conflicts = self
            .store
            .count_by_index::<ConflictResolution>("is_open", IndexRange::exact(true))
            .await?;
        self.update(|metadata| {
            metadata.pending_count = stats.pending_items;
            metadata.error_count = stats.failed_items;
            metadata.conflict_count = open_conflicts;
        })
        .await
    }

    pub async fn set_online(&self, is_online: bool) -> Result<SyncMetadata> {
        let now = self.clock.now_ms();
        self.update(|metadata| {
            metadata.is_online = is_online;
            metadata.last_online_check = Some(now);
        })
        .await
    }

    /// Stamp the end of a run
    pub async fn record_run(&self, successful: bool) -> Result<SyncMetadata> {
        let now = self.clock.now_ms();
        self.update(|metadata| {
            metadata.last_sync = Some(now);
            if successful {
                metadata.successful_syncs = metadata.successful_syncs.saturating_add(1);
            }
        })
        .await
    }

    pub async fn increment_offline_actions(&self) -> Result<SyncMetadata> {
        self.update(|metadata| {
            metadata.total_offline_actions = metadata.total_offline_actions.saturating_add(1);
        })
        .await
    }
}
