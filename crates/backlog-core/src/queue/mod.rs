//! Pending-operation queue
//!
//! A logical view over the `pending_operations` table. Items are selected in
//! strict priority order with a FIFO tie-break, retried with exponential
//! backoff, parked while in conflict and retained once exhausted until
//! [`PendingQueue::cleanup`] removes them.

mod backoff;

pub use backoff::BackoffPolicy;

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::db::{DurableStore, IndexRange, Query};
use crate::error::{Error, Result};
use crate::models::{ConflictResolution, EnqueueOptions, OperationId, PendingOperation, SyncAction};
use crate::util::duration_to_ms;

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

/// Result of one execution attempt, as reported by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure {
        error: String,
    },
    Conflict {
        server_data: Option<serde_json::Value>,
        message: String,
    },
    /// Failure that will never succeed; spends the remaining budget
    TerminalFailure {
        error: String,
    },
}

/// What [`PendingQueue::record_attempt`] did to the item
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptEffect {
    Removed,
    Rescheduled(PendingOperation),
    Exhausted(PendingOperation),
    Conflicted(PendingOperation, ConflictResolution),
}

/// Queue health computed by a full scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_items: usize,
    /// Items with budget left, conflicted ones included
    pub pending_items: usize,
    /// Exhausted items awaiting cleanup
    pub failed_items: usize,
    pub conflicted_items: usize,
    pub average_wait_ms: i64,
    /// `created_at` of the oldest item
    pub oldest_item: Option<i64>,
    /// `created_at` of the newest item
    pub newest_item: Option<i64>,
}

#[derive(Clone)]
pub struct PendingQueue {
    store: DurableStore,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    default_max_attempts: u32,
}

impl PendingQueue {
    pub fn new(store: DurableStore, clock: Arc<dyn Clock>, config: &QueueConfig) -> Self {
        Self {
            store,
            clock,
            backoff: BackoffPolicy::from(config),
            default_max_attempts: config.default_max_attempts,
        }
    }

    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Add an operation, ready at `now` (plus the optional delay)
    pub async fn enqueue(
        &self,
        action: SyncAction,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<PendingOperation> {
        let entity_type = entity_type.trim();
        let entity_id = entity_id.trim();
        if entity_type.is_empty() || entity_id.is_empty() {
            return Err(Error::InvalidInput(
                "entity type and entity id must not be empty".to_string(),
            ));
        }
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let now = self.clock.now_ms();
        let delay = options.delay.map_or(0, duration_to_ms);
        let operation = PendingOperation {
            id: OperationId::new(),
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            payload,
            priority: options.priority.unwrap_or_else(|| action.default_priority()),
            attempts: 0,
            max_attempts,
            next_retry_at: now.saturating_add(delay),
            created_at: now,
            last_attempt_at: None,
            last_error: None,
            conflict_id: None,
        };
        self.store.put(&operation).await?;

        tracing::debug!(
            operation_id = %operation.id,
            entity_type = %operation.entity_type,
            action = %operation.action,
            priority = %operation.priority,
            "Enqueued operation"
        );
        Ok(operation)
    }

    pub async fn get(&self, id: &OperationId) -> Result<Option<PendingOperation>> {
        Ok(self.store.get(&id.as_str()).await?)
    }

    /// Every item, in execution order
    pub async fn list(&self) -> Result<Vec<PendingOperation>> {
        self.scan(Query::new()).await
    }

    /// Items that may run at `now`, highest priority first, oldest first
    pub async fn get_ready(&self, now: i64) -> Result<Vec<PendingOperation>> {
        self.scan(Query::new().filter(move |op: &PendingOperation| op.is_ready(now)))
            .await
    }

    /// Ordered by `(priority, created_at)`; the priority index returns rows
    /// in insertion order within one priority, and the sort is stable.
    async fn scan(&self, query: Query<PendingOperation>) -> Result<Vec<PendingOperation>> {
        let query = query.order_by(|a: &PendingOperation, b: &PendingOperation| {
            (a.priority, a.created_at).cmp(&(b.priority, b.created_at))
        });
        Ok(self
            .store
            .get_by_index("priority", IndexRange::at_least(0_i64), query)
            .await?)
    }

    /// Apply the outcome of executing `id`
    pub async fn record_attempt(
        &self,
        id: &OperationId,
        outcome: AttemptOutcome,
    ) -> Result<AttemptEffect> {
        let key = id.as_str();
        let mut operation = self
            .store
            .get::<PendingOperation>(&key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pending operation {key}")))?;
        let now = self.clock.now_ms();

        match outcome {
            AttemptOutcome::Success => {
                self.store.delete::<PendingOperation>(&key).await?;
                Ok(AttemptEffect::Removed)
            }
            AttemptOutcome::RetryableFailure { error } => {
                operation.attempts = operation.attempts.saturating_add(1);
                self.reschedule(&mut operation, now, error).await?;
                if operation.is_exhausted() {
                    tracing::warn!(
                        operation_id = %operation.id,
                        entity_type = %operation.entity_type,
                        attempts = operation.attempts,
                        "Operation exhausted its retries"
                    );
                    Ok(AttemptEffect::Exhausted(operation))
                } else {
                    Ok(AttemptEffect::Rescheduled(operation))
                }
            }
            AttemptOutcome::TerminalFailure { error } => {
                operation.attempts = operation.max_attempts;
                self.reschedule(&mut operation, now, error).await?;
                Ok(AttemptEffect::Exhausted(operation))
            }
            AttemptOutcome::Conflict {
                server_data,
                message,
            } => {
                let conflict =
                    ConflictResolution::detected(&operation, server_data, message.clone(), now);
                self.store.put(&conflict).await?;

                operation.conflict_id = Some(conflict.conflict_id.clone());
                operation.last_attempt_at = Some(now);
                operation.last_error = Some(message);
                self.store.put(&operation).await?;
                Ok(AttemptEffect::Conflicted(operation, conflict))
            }
        }
    }

    async fn reschedule(
        &self,
        operation: &mut PendingOperation,
        now: i64,
        error: String,
    ) -> Result<()> {
        let delay = self
            .backoff
            .delay(operation.attempts, operation.max_attempts);
        operation.last_attempt_at = Some(now);
        operation.last_error = Some(error);
        operation.next_retry_at = now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX));
        self.store.put(&*operation).await?;
        Ok(())
    }

    /// Drop the item unconditionally; returns whether it existed
    pub async fn remove(&self, id: &OperationId) -> Result<bool> {
        Ok(self.store.delete::<PendingOperation>(&id.as_str()).await?)
    }

    /// Drop every item for one entity
    pub async fn remove_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<usize> {
        let mut removed = 0;
        for operation in self.for_entity(entity_type, entity_id).await? {
            if self.remove(&operation.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<PendingOperation>> {
        let entity_type = entity_type.to_string();
        Ok(self
            .store
            .get_by_index(
                "entity_id",
                IndexRange::exact(entity_id),
                Query::new().filter(move |op: &PendingOperation| op.entity_type == entity_type),
            )
            .await?)
    }

    /// Point queued operations at a server-assigned id
    pub async fn rewrite_entity_id(
        &self,
        entity_type: &str,
        from: &str,
        to: &str,
    ) -> Result<usize> {
        let mut rewritten = 0;
        for mut operation in self.for_entity(entity_type, from).await? {
            operation.entity_id = to.to_string();
            self.store.put(&operation).await?;
            rewritten += 1;
        }
        Ok(rewritten)
    }

    /// Release a conflicted item so it runs on the next sync
    ///
    /// `payload` replaces the queued payload when given.
    pub async fn clear_conflict(
        &self,
        id: &OperationId,
        payload: Option<serde_json::Value>,
    ) -> Result<PendingOperation> {
        let key = id.as_str();
        let mut operation = self
            .store
            .get::<PendingOperation>(&key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pending operation {key}")))?;
        operation.conflict_id = None;
        operation.next_retry_at = self.clock.now_ms();
        if let Some(payload) = payload {
            operation.payload = payload;
        }
        self.store.put(&operation).await?;
        Ok(operation)
    }

    /// Give exhausted items a fresh budget; returns how many were reset
    pub async fn retry_failed(&self) -> Result<Vec<PendingOperation>> {
        let now = self.clock.now_ms();
        let mut reset = Vec::new();
        for mut operation in self
            .scan(Query::new().filter(PendingOperation::is_exhausted))
            .await?
        {
            operation.attempts = 0;
            operation.next_retry_at = now;
            self.store.put(&operation).await?;
            reset.push(operation);
        }
        Ok(reset)
    }

    /// Items with budget left
    pub async fn count_pending(&self) -> Result<usize> {
        Ok(self
            .scan(Query::new().filter(|op: &PendingOperation| !op.is_exhausted()))
            .await?
            .len())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let now = self.clock.now_ms();
        let items = self.list().await?;
        if items.is_empty() {
            return Ok(QueueStats::default());
        }

        let total_wait: i64 = items
            .iter()
            .map(|op| now.saturating_sub(op.created_at).max(0))
            .fold(0_i64, i64::saturating_add);
        let total = i64::try_from(items.len()).unwrap_or(i64::MAX);

        Ok(QueueStats {
            total_items: items.len(),
            pending_items: items.iter().filter(|op| !op.is_exhausted()).count(),
            failed_items: items.iter().filter(|op| op.is_exhausted()).count(),
            conflicted_items: items.iter().filter(|op| op.is_conflicted()).count(),
            average_wait_ms: total_wait / total,
            oldest_item: items.iter().map(|op| op.created_at).min(),
            newest_item: items.iter().map(|op| op.created_at).max(),
        })
    }

    /// Remove exhausted items created more than `max_age_days` ago
    pub async fn cleanup(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(i64::from(max_age_days).saturating_mul(DAY_MS));
        let stale = self
            .store
            .get_by_index(
                "created_at",
                IndexRange::below(cutoff),
                Query::new().filter(PendingOperation::is_exhausted),
            )
            .await?;

        let mut removed = 0;
        for operation in stale {
            if self.remove(&operation.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, max_age_days, "Cleaned up exhausted operations");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Priority, Resolution};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const START: i64 = 1_700_000_000_000;

    async fn setup() -> (PendingQueue, Arc<ManualClock>) {
        let store = DurableStore::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let queue = PendingQueue::new(store, clock.clone(), &QueueConfig::default());
        (queue, clock)
    }

    async fn enqueue(queue: &PendingQueue, action: SyncAction, id: &str) -> PendingOperation {
        queue
            .enqueue(
                action,
                "price",
                id,
                serde_json::json!({"id": id}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
    }

    fn network_error() -> AttemptOutcome {
        AttemptOutcome::RetryableFailure {
            error: "connection refused".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_defaults() {
        let (queue, _) = setup().await;
        let op = enqueue(&queue, SyncAction::Create, "p-1").await;

        assert_eq!(op.attempts, 0);
        assert_eq!(op.max_attempts, 3);
        assert_eq!(op.priority, Priority::High);
        assert_eq!(op.next_retry_at, START);
        assert_eq!(queue.get(&op.id).await.unwrap(), Some(op));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_rejects_blank_ids() {
        let (queue, _) = setup().await;
        let error = queue
            .enqueue(
                SyncAction::Update,
                "price",
                "  ",
                serde_json::Value::Null,
                EnqueueOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delayed_item_is_not_ready_until_due() {
        let (queue, clock) = setup().await;
        queue
            .enqueue(
                SyncAction::Update,
                "price",
                "p-1",
                serde_json::json!({}),
                EnqueueOptions::default().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert!(queue.get_ready(clock.now_ms()).await.unwrap().is_empty());
        clock.advance(Duration::from_secs(5));
        assert_eq!(queue.get_ready(clock.now_ms()).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ready_items_sorted_by_priority_then_age() {
        let (queue, clock) = setup().await;
        let low = queue
            .enqueue(
                SyncAction::Update,
                "reference",
                "r-1",
                serde_json::json!({}),
                EnqueueOptions::default().with_priority(Priority::Low),
            )
            .await
            .unwrap();
        let update_a = enqueue(&queue, SyncAction::Update, "a").await;
        let update_b = enqueue(&queue, SyncAction::Update, "b").await;
        clock.advance(Duration::from_millis(1));
        let create = enqueue(&queue, SyncAction::Create, "c").await;
        let delete = enqueue(&queue, SyncAction::Delete, "d").await;

        let ready = queue.get_ready(clock.now_ms()).await.unwrap();
        let ids = ready.iter().map(|op| op.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![delete.id, create.id, update_a.id, update_b.id, low.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_equal_timestamps_keep_insertion_order_after_retry() {
        let (queue, clock) = setup().await;
        let first = enqueue(&queue, SyncAction::Update, "a").await;
        let second = enqueue(&queue, SyncAction::Update, "b").await;

        queue.record_attempt(&first.id, network_error()).await.unwrap();
        clock.advance(Duration::from_secs(60));

        let ready = queue.get_ready(clock.now_ms()).await.unwrap();
        assert_eq!(
            ready.iter().map(|op| op.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retryable_failure_backs_off() {
        let (queue, clock) = setup().await;
        let op = enqueue(&queue, SyncAction::Update, "p-1").await;

        let effect = queue.record_attempt(&op.id, network_error()).await.unwrap();
        let AttemptEffect::Rescheduled(updated) = effect else {
            panic!("expected reschedule, got {effect:?}");
        };
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.last_error.as_deref(), Some("connection refused"));
        assert_eq!(updated.last_attempt_at, Some(START));
        assert!((START + 1_000..=START + 1_100).contains(&updated.next_retry_at));
        assert!(queue.get_ready(clock.now_ms()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhaustion_is_terminal() {
        let (queue, clock) = setup().await;
        let op = enqueue(&queue, SyncAction::Create, "p-1").await;

        for _ in 0..3 {
            clock.advance(Duration::from_secs(600));
            queue.record_attempt(&op.id, network_error()).await.unwrap();
        }

        let stored = queue.get(&op.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 3);
        clock.advance(Duration::from_secs(10 * 365 * 24 * 60 * 60));
        assert!(queue.get_ready(clock.now_ms()).await.unwrap().is_empty());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed_items, 1);
        assert_eq!(stats.pending_items, 0);
        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminal_failure_spends_budget() {
        let (queue, _) = setup().await;
        let op = enqueue(&queue, SyncAction::Create, "p-1").await;

        let effect = queue
            .record_attempt(
                &op.id,
                AttemptOutcome::TerminalFailure {
                    error: "malformed payload (422)".to_string(),
                },
            )
            .await
            .unwrap();
        let AttemptEffect::Exhausted(updated) = effect else {
            panic!("expected exhaustion, got {effect:?}");
        };
        assert_eq!(updated.attempts, updated.max_attempts);
        assert_eq!(updated.next_retry_at, START + 86_400_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_parks_item_without_spending_attempts() {
        let (queue, clock) = setup().await;
        let op = enqueue(&queue, SyncAction::Update, "p-1").await;

        let effect = queue
            .record_attempt(
                &op.id,
                AttemptOutcome::Conflict {
                    server_data: Some(serde_json::json!({"amount": 9})),
                    message: "version mismatch".to_string(),
                },
            )
            .await
            .unwrap();
        let AttemptEffect::Conflicted(updated, conflict) = effect else {
            panic!("expected conflict, got {effect:?}");
        };
        assert_eq!(updated.attempts, 0);
        assert_eq!(updated.conflict_id.as_deref(), Some(conflict.conflict_id.as_str()));
        assert_eq!(conflict.resolution, Resolution::Manual);
        assert!(conflict.is_open());

        clock.advance(Duration::from_secs(3_600));
        assert!(queue.get_ready(clock.now_ms()).await.unwrap().is_empty());
        assert_eq!(queue.stats().await.unwrap().conflicted_items, 1);

        let released = queue.clear_conflict(&op.id, None).await.unwrap();
        assert_eq!(released.conflict_id, None);
        assert_eq!(queue.get_ready(clock.now_ms()).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_success_removes_item() {
        let (queue, clock) = setup().await;
        let op = enqueue(&queue, SyncAction::Delete, "p-1").await;

        let effect = queue
            .record_attempt(&op.id, AttemptOutcome::Success)
            .await
            .unwrap();
        assert_eq!(effect, AttemptEffect::Removed);
        assert!(queue.get_ready(clock.now_ms()).await.unwrap().is_empty());
        assert!(matches!(
            queue.record_attempt(&op.id, AttemptOutcome::Success).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_only_removes_old_exhausted_items() {
        let (queue, clock) = setup().await;
        let old_failed = enqueue(&queue, SyncAction::Create, "old").await;
        let old_pending = enqueue(&queue, SyncAction::Create, "pending").await;
        queue
            .record_attempt(
                &old_failed.id,
                AttemptOutcome::TerminalFailure {
                    error: "bad".to_string(),
                },
            )
            .await
            .unwrap();

        clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
        let fresh_failed = enqueue(&queue, SyncAction::Create, "fresh").await;
        queue
            .record_attempt(
                &fresh_failed.id,
                AttemptOutcome::TerminalFailure {
                    error: "bad".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(queue.cleanup(7).await.unwrap(), 1);
        assert_eq!(queue.get(&old_failed.id).await.unwrap(), None);
        assert!(queue.get(&old_pending.id).await.unwrap().is_some());
        assert!(queue.get(&fresh_failed.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_reports_ages() {
        let (queue, clock) = setup().await;
        enqueue(&queue, SyncAction::Update, "a").await;
        clock.advance(Duration::from_secs(10));
        enqueue(&queue, SyncAction::Update, "b").await;
        clock.advance(Duration::from_secs(10));

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.pending_items, 2);
        assert_eq!(stats.average_wait_ms, 15_000);
        assert_eq!(stats.oldest_item, Some(START));
        assert_eq!(stats.newest_item, Some(START + 10_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rewrite_entity_id_and_retry_failed() {
        let (queue, clock) = setup().await;
        let update = enqueue(&queue, SyncAction::Update, "tmp-1").await;
        let other = enqueue(&queue, SyncAction::Update, "tmp-2").await;

        assert_eq!(queue.rewrite_entity_id("price", "tmp-1", "srv-1").await.unwrap(), 1);
        assert_eq!(queue.get(&update.id).await.unwrap().unwrap().entity_id, "srv-1");
        assert_eq!(queue.get(&other.id).await.unwrap().unwrap().entity_id, "tmp-2");

        queue
            .record_attempt(
                &other.id,
                AttemptOutcome::TerminalFailure {
                    error: "bad".to_string(),
                },
            )
            .await
            .unwrap();
        let reset = queue.retry_failed().await.unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].attempts, 0);
        assert_eq!(queue.get_ready(clock.now_ms()).await.unwrap().len(), 2);

        assert_eq!(queue.remove_for_entity("price", "srv-1").await.unwrap(), 1);
        assert_eq!(queue.list().await.unwrap().len(), 1);
    }
}
