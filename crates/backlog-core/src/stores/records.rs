//! Offline record store

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{DurableStore, IndexRange, Query};
use crate::error::{Error, Result};
use crate::models::{record_key, OfflineRecord, RecordStatus};

/// Local snapshots of entities awaiting remote confirmation
#[derive(Clone)]
pub struct OfflineRecordStore {
    store: DurableStore,
    clock: Arc<dyn Clock>,
}

impl OfflineRecordStore {
    pub fn new(store: DurableStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Write the latest local snapshot, resetting it to `Pending`
    pub async fn save(
        &self,
        entity_type: &str,
        id: &str,
        data: serde_json::Value,
    ) -> Result<OfflineRecord> {
        let now = self.clock.now_ms();
        let record = match self.get(entity_type, id).await? {
            Some(mut existing) => {
                existing.data = data;
                existing.status = RecordStatus::Pending;
                existing.updated_at = now;
                existing.last_error = None;
                existing
            }
            None => OfflineRecord::new(entity_type, id, data, now),
        };
        self.store.put(&record).await?;
        Ok(record)
    }

    pub async fn get(&self, entity_type: &str, id: &str) -> Result<Option<OfflineRecord>> {
        Ok(self.store.get(&record_key(entity_type, id)).await?)
    }

    /// Records of one type, oldest first
    pub async fn list(&self, entity_type: &str) -> Result<Vec<OfflineRecord>> {
        Ok(self
            .store
            .get_by_index("entity_type", IndexRange::exact(entity_type), Query::new())
            .await?)
    }

    pub async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<OfflineRecord>> {
        Ok(self
            .store
            .get_by_index("status", IndexRange::exact(status.as_str()), Query::new())
            .await?)
    }

    pub async fn count_by_status(&self, status: RecordStatus) -> Result<usize> {
        Ok(self
            .store
            .count_by_index::<OfflineRecord>("status", IndexRange::exact(status.as_str()))
            .await?)
    }

    /// Move a record to `status`; a missing record is not an error
    ///
    /// `Retry` and `Error` bump the retry count and keep `error`.
    pub async fn set_status(
        &self,
        entity_type: &str,
        id: &str,
        status: RecordStatus,
        error: Option<String>,
    ) -> Result<Option<OfflineRecord>> {
        let Some(mut record) = self.get(entity_type, id).await? else {
            return Ok(None);
        };
        let now = self.clock.now_ms();
        record.status = status;
        record.updated_at = now;
        match status {
            RecordStatus::Synced => {
                record.synced_at = Some(now);
                record.last_error = None;
            }
            RecordStatus::Retry | RecordStatus::Error => {
                record.retry_count = record.retry_count.saturating_add(1);
                record.last_error = error;
            }
            RecordStatus::Conflict => record.last_error = error,
            RecordStatus::Pending | RecordStatus::Syncing => {}
        }
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    /// Mark synced, optionally replacing data with the server's copy
    pub async fn mark_synced(
        &self,
        entity_type: &str,
        id: &str,
        server_id: Option<String>,
        server_data: Option<serde_json::Value>,
    ) -> Result<Option<OfflineRecord>> {
        let Some(mut record) = self.set_status(entity_type, id, RecordStatus::Synced, None).await?
        else {
            return Ok(None);
        };
        if server_id.is_none() && server_data.is_none() {
            return Ok(Some(record));
        }
        if let Some(server_id) = server_id {
            record.server_id = Some(server_id);
        }
        if let Some(data) = server_data {
            record.data = data;
        }
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    /// Settle a record that still has queued work after one operation synced
    ///
    /// Unlike [`set_status`](Self::set_status) the retry count and last
    /// error are left alone; they belong to the operations still queued.
    pub async fn hold(
        &self,
        entity_type: &str,
        id: &str,
        status: RecordStatus,
        server_id: Option<String>,
    ) -> Result<Option<OfflineRecord>> {
        let Some(mut record) = self.get(entity_type, id).await? else {
            return Ok(None);
        };
        record.status = status;
        record.updated_at = self.clock.now_ms();
        if server_id.is_some() {
            record.server_id = server_id;
        }
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    /// Move a record to the id the server assigned
    pub async fn rekey(
        &self,
        entity_type: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<OfflineRecord>> {
        let Some(mut record) = self.get(entity_type, from).await? else {
            return Ok(None);
        };
        record.id = to.to_string();
        self.store.put(&record).await?;
        self.store
            .delete::<OfflineRecord>(&record_key(entity_type, from))
            .await?;
        Ok(Some(record))
    }

    /// Explicit local delete; returns whether the record existed
    pub async fn delete(&self, entity_type: &str, id: &str) -> Result<bool> {
        Ok(self
            .store
            .delete::<OfflineRecord>(&record_key(entity_type, id))
            .await?)
    }

    /// Fetch a record that must exist
    pub async fn require(&self, entity_type: &str, id: &str) -> Result<OfflineRecord> {
        self.get(entity_type, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("record {}", record_key(entity_type, id))))
    }
}
