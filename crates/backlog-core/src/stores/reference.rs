//! TTL cache for reference data pulled from the remote

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::db::{DurableStore, IndexRange, Query, Record};
use crate::error::Result;
use crate::models::ReferenceEntry;
use crate::util::duration_to_ms;

#[derive(Clone)]
pub struct ReferenceCache {
    store: DurableStore,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ReferenceCache {
    pub fn new(store: DurableStore, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub async fn put(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
    ) -> Result<ReferenceEntry> {
        let now = self.clock.now_ms();
        let entry = ReferenceEntry {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            fetched_at: now,
            expires_at: now.saturating_add(duration_to_ms(self.ttl)),
        };
        self.store.put(&entry).await?;
        Ok(entry)
    }

    /// Cached entry, `None` when missing or expired
    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<ReferenceEntry>> {
        let key = format!("{entity_type}:{entity_id}");
        let now = self.clock.now_ms();
        Ok(self
            .store
            .get::<ReferenceEntry>(&key)
            .await?
            .filter(|entry| !entry.is_expired(now)))
    }

    /// Live entries of one type
    pub async fn list(&self, entity_type: &str) -> Result<Vec<ReferenceEntry>> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .get_by_index(
                "entity_type",
                IndexRange::exact(entity_type),
                Query::new().filter(move |entry: &ReferenceEntry| !entry.is_expired(now)),
            )
            .await?)
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        let expired = self
            .store
            .get_by_index::<ReferenceEntry>(
                "expires_at",
                IndexRange::at_most(self.clock.now_ms()),
                Query::new(),
            )
            .await?;
        let mut removed = 0;
        for entry in expired {
            if self.store.delete::<ReferenceEntry>(&entry.key()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entries_expire() {
        let store = DurableStore::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = ReferenceCache::new(store, clock.clone(), Duration::from_secs(60));

        cache
            .put("reference", "unit-kg", serde_json::json!({"label": "kg"}))
            .await
            .unwrap();
        assert!(cache.get("reference", "unit-kg").await.unwrap().is_some());
        assert_eq!(cache.list("reference").await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(61));
        assert!(cache.get("reference", "unit-kg").await.unwrap().is_none());
        assert!(cache.list("reference").await.unwrap().is_empty());
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }
}
