//! Conflict records

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{DurableStore, IndexRange, Query};
use crate::error::{Error, Result};
use crate::models::{ConflictResolution, Resolution};

#[derive(Clone)]
pub struct ConflictStore {
    store: DurableStore,
    clock: Arc<dyn Clock>,
}

impl ConflictStore {
    pub fn new(store: DurableStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get(&self, conflict_id: &str) -> Result<Option<ConflictResolution>> {
        Ok(self.store.get(conflict_id).await?)
    }

    /// Unresolved conflicts, oldest first
    pub async fn list_open(&self) -> Result<Vec<ConflictResolution>> {
        Ok(self
            .store
            .get_by_index("is_open", IndexRange::exact(true), Query::new())
            .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<ConflictResolution>> {
        Ok(self
            .store
            .get_by_index("created_at", IndexRange::at_least(0_i64), Query::new())
            .await?)
    }

    pub async fn count_open(&self) -> Result<usize> {
        Ok(self
            .store
            .count_by_index::<ConflictResolution>("is_open", IndexRange::exact(true))
            .await?)
    }

    /// Close an open conflict with `resolution`
    pub async fn resolve(
        &self,
        conflict_id: &str,
        resolution: Resolution,
        resolved_by: &str,
    ) -> Result<ConflictResolution> {
        let mut conflict = self
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if !conflict.is_open() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }
        conflict.resolution = resolution;
        conflict.resolved_at = Some(self.clock.now_ms());
        conflict.resolved_by = Some(resolved_by.to_string());
        self.store.put(&conflict).await?;
        Ok(conflict)
    }

    /// Store a conflict as given (used for conflicts settled at detection)
    pub async fn save(&self, conflict: &ConflictResolution) -> Result<()> {
        self.store.put(conflict).await?;
        Ok(())
    }
}
