//! Append-only audit log

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{DurableStore, IndexRange, Query};
use crate::error::Result;
use crate::models::{AuditEvent, EventKind};

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

#[derive(Clone)]
pub struct EventLog {
    store: DurableStore,
    clock: Arc<dyn Clock>,
}

impl EventLog {
    pub fn new(store: DurableStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an event stamped with the current time
    pub async fn append(&self, kind: EventKind, details: serde_json::Value) -> Result<AuditEvent> {
        self.append_event(AuditEvent::new(kind, self.clock.now_ms(), details))
            .await
    }

    pub async fn append_for_entity(
        &self,
        kind: EventKind,
        entity_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<AuditEvent> {
        self.append_event(
            AuditEvent::new(kind, self.clock.now_ms(), details).for_entity(entity_type, entity_id),
        )
        .await
    }

    async fn append_event(&self, event: AuditEvent) -> Result<AuditEvent> {
        self.store.put(&event).await?;
        Ok(event)
    }

    /// Events with `from <= timestamp <= to`, oldest first
    pub async fn list_between(&self, from: i64, to: i64) -> Result<Vec<AuditEvent>> {
        Ok(self
            .store
            .get_by_index("timestamp", IndexRange::between(from, to), Query::new())
            .await?)
    }

    /// The `limit` most recent events, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        Ok(self
            .store
            .get_by_index(
                "timestamp",
                IndexRange::at_least(i64::MIN),
                Query::new()
                    .order_by(|a: &AuditEvent, b: &AuditEvent| b.timestamp.cmp(&a.timestamp))
                    .limit(limit),
            )
            .await?)
    }

    pub async fn list_by_kind(&self, kind: EventKind) -> Result<Vec<AuditEvent>> {
        Ok(self
            .store
            .get_by_index("kind", IndexRange::exact(kind.as_str()), Query::new())
            .await?)
    }

    /// Drop events older than `max_age_days`
    pub async fn prune(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(i64::from(max_age_days).saturating_mul(DAY_MS));
        let stale = self
            .store
            .get_by_index::<AuditEvent>("timestamp", IndexRange::below(cutoff), Query::new())
            .await?;
        let mut removed = 0;
        for event in stale {
            if self.store.delete::<AuditEvent>(&event.id).await? {
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
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_list_and_prune() {
        let store = DurableStore::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let events = EventLog::new(store, clock.clone());

        events
            .append(EventKind::SyncStarted, serde_json::json!({}))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2 * 24 * 60 * 60));
        events
            .append_for_entity(EventKind::Enqueued, "price", "p-1", serde_json::json!({}))
            .await
            .unwrap();
        events
            .append(EventKind::SyncCompleted, serde_json::json!({"synced": 1}))
            .await
            .unwrap();

        let recent = events.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|event| event.timestamp == clock.now_ms()));

        let early = events.list_between(0, 1_000).await.unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].kind, EventKind::SyncStarted);

        let enqueued = events.list_by_kind(EventKind::Enqueued).await.unwrap();
        assert_eq!(enqueued[0].entity_id.as_deref(), Some("p-1"));

        assert_eq!(events.prune(1).await.unwrap(), 1);
        assert_eq!(events.recent(10).await.unwrap().len(), 2);
    }
}
