//! Sync orchestrator: single-flight runs over the pending queue, per-item
//! dispatch to the remote authority, and conflict resolution.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::classify::{classify, Classification, FailureKind};
use super::observer::{EngineEvent, SyncObserver};
use super::{ItemError, RunStatus, SyncOptions, SyncResult, SyncStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::db::DurableStore;
use crate::error::{Error, RemoteError, Result};
use crate::models::{
    ConflictDecision, ConflictResolution, EnqueueOptions, Entity, EventKind, OperationId,
    PendingOperation, RecordStatus, Resolution, SyncAction, SyncMetadata,
};
use crate::queue::{AttemptEffect, AttemptOutcome, PendingQueue, QueueStats};
use crate::remote::{RemoteAuthority, RemoteRequest};
use crate::stores::{ConflictStore, EventLog, MetadataManager, OfflineRecordStore, ReferenceCache};

const EVENT_CAPACITY: usize = 256;
const NO_AUTO_SYNC: i64 = i64::MIN;
const AUTO_RESOLVER: &str = "auto";

pub(super) struct EngineInner {
    pub(super) config: EngineConfig,
    store: DurableStore,
    pub(super) clock: Arc<dyn Clock>,
    queue: PendingQueue,
    records: OfflineRecordStore,
    metadata: MetadataManager,
    conflicts: ConflictStore,
    events: EventLog,
    references: ReferenceCache,
    remote: Arc<dyn RemoteAuthority>,
    pub(super) monitor: ConnectivityMonitor,
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
    syncing: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    next_auto_sync: AtomicI64,
    notifier: broadcast::Sender<EngineEvent>,
}

impl EngineInner {
    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the running flag however a run ends
struct RunGuard<'a> {
    inner: &'a EngineInner,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.inner.cancel_slot() = None;
        self.inner.syncing.store(false, Ordering::SeqCst);
    }
}

/// Whether the run continues after an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemFlow {
    Continue,
    Aborted,
}

#[derive(Default)]
struct RunReport {
    synced: usize,
    conflicts: Vec<ConflictResolution>,
    errors: Vec<ItemError>,
}

/// Offline-first sync engine; clones share one engine
#[derive(Clone)]
pub struct SyncEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        store: DurableStore,
        remote: Arc<dyn RemoteAuthority>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::with_clock(store, remote, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: DurableStore,
        remote: Arc<dyn RemoteAuthority>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if !store.is_available() {
            tracing::warn!("Durable store unavailable; sync is disabled");
        }

        let monitor =
            ConnectivityMonitor::new(remote.clone(), clock.clone(), config.monitor.clone());
        let reference_ttl = Duration::from_secs(config.sync.reference_ttl_secs);
        let (notifier, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(EngineInner {
                queue: PendingQueue::new(store.clone(), clock.clone(), &config.queue),
                records: OfflineRecordStore::new(store.clone(), clock.clone()),
                metadata: MetadataManager::new(store.clone(), clock.clone()),
                conflicts: ConflictStore::new(store.clone(), clock.clone()),
                events: EventLog::new(store.clone(), clock.clone()),
                references: ReferenceCache::new(store.clone(), clock.clone(), reference_ttl),
                config,
                store,
                clock,
                remote,
                monitor,
                observers: RwLock::new(Vec::new()),
                syncing: AtomicBool::new(false),
                cancel: Mutex::new(None),
                next_auto_sync: AtomicI64::new(NO_AUTO_SYNC),
                notifier,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.inner.queue
    }

    pub fn records(&self) -> &OfflineRecordStore {
        &self.inner.records
    }

    pub fn conflicts(&self) -> &ConflictStore {
        &self.inner.conflicts
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.inner.references
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    /// False when the durable store could not be opened
    pub fn is_enabled(&self) -> bool {
        self.inner.store.is_available()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Change notifications; slow receivers miss events rather than block
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.notifier.subscribe()
    }

    fn notify(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.inner.notifier.send(event);
    }

    fn notify_record(&self, entity_type: &str, entity_id: &str) {
        self.notify(EngineEvent::RecordChanged {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        });
    }

    fn each_observer(&self, f: impl Fn(&dyn SyncObserver)) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    // Local writes

    /// Queue an operation; creates and updates also store the local snapshot
    pub async fn enqueue(
        &self,
        action: SyncAction,
        entity_type: &str,
        entity_id: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<PendingOperation> {
        let inner = &*self.inner;
        let operation = inner
            .queue
            .enqueue(action, entity_type, entity_id, payload, options)
            .await?;
        if action != SyncAction::Delete {
            inner
                .records
                .save(
                    &operation.entity_type,
                    &operation.entity_id,
                    operation.payload.clone(),
                )
                .await?;
        }
        self.after_enqueue(&operation).await?;
        Ok(operation)
    }

    async fn after_enqueue(&self, operation: &PendingOperation) -> Result<()> {
        let inner = &*self.inner;
        inner.metadata.increment_offline_actions().await?;
        inner
            .events
            .append_for_entity(
                EventKind::Enqueued,
                &operation.entity_type,
                &operation.entity_id,
                json!({
                    "operation_id": operation.id,
                    "action": operation.action,
                    "priority": operation.priority,
                }),
            )
            .await?;
        self.notify(EngineEvent::QueueChanged);
        self.notify_record(&operation.entity_type, &operation.entity_id);
        Ok(())
    }

    pub async fn create_record(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<PendingOperation> {
        self.enqueue(SyncAction::Create, entity_type, entity_id, data, options)
            .await
    }

    pub async fn update_record(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<PendingOperation> {
        self.enqueue(SyncAction::Update, entity_type, entity_id, data, options)
            .await
    }

    /// Delete locally and queue the remote delete
    ///
    /// Queued work for the entity is dropped. An entity whose create never
    /// reached the remote is only removed locally and `None` is returned.
    pub async fn delete_record(
        &self,
        entity_type: &str,
        entity_id: &str,
        options: EnqueueOptions,
    ) -> Result<Option<PendingOperation>> {
        let inner = &*self.inner;
        let record = inner.records.get(entity_type, entity_id).await?;
        let queued = inner.queue.for_entity(entity_type, entity_id).await?;
        let never_synced = queued
            .iter()
            .any(|operation| operation.action == SyncAction::Create);

        inner.queue.remove_for_entity(entity_type, entity_id).await?;
        inner.records.delete(entity_type, entity_id).await?;
        self.notify_record(entity_type, entity_id);

        if never_synced {
            tracing::debug!(entity_type, entity_id, "Dropped never-synced entity");
            self.notify(EngineEvent::QueueChanged);
            return Ok(None);
        }

        let remote_id = record
            .and_then(|record| record.server_id)
            .unwrap_or_else(|| entity_id.to_string());
        let operation = inner
            .queue
            .enqueue(
                SyncAction::Delete,
                entity_type,
                &remote_id,
                serde_json::Value::Null,
                options,
            )
            .await?;
        self.after_enqueue(&operation).await?;
        Ok(Some(operation))
    }

    pub async fn create_entity<E: Entity>(
        &self,
        entity: &E,
        options: EnqueueOptions,
    ) -> Result<PendingOperation> {
        self.create_record(E::ENTITY_TYPE, &entity.entity_id(), entity.encode()?, options)
            .await
    }

    pub async fn update_entity<E: Entity>(
        &self,
        entity: &E,
        options: EnqueueOptions,
    ) -> Result<PendingOperation> {
        self.update_record(E::ENTITY_TYPE, &entity.entity_id(), entity.encode()?, options)
            .await
    }

    /// Latest local snapshot of a typed entity
    pub async fn load_entity<E: Entity>(&self, entity_id: &str) -> Result<Option<E>> {
        self.inner
            .records
            .get(E::ENTITY_TYPE, entity_id)
            .await?
            .map(|record| E::decode(&record.entity_type, &record.data))
            .transpose()
    }

    // Runs

    /// Drain the ready part of the queue once
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncResult> {
        let inner = &*self.inner;
        if !inner.store.is_available() {
            return Err(Error::SyncDisabled);
        }
        if inner
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadySyncing);
        }
        let token = CancellationToken::new();
        *inner.cancel_slot() = Some(token.clone());
        let _guard = RunGuard { inner };

        if !options.force && !inner.monitor.is_online() {
            return Err(Error::Offline);
        }

        match self.run(&token).await {
            Ok(result) => Ok(result),
            Err(error) => {
                tracing::error!(%error, "Sync run failed");
                let message = error.to_string();
                self.each_observer(|observer| observer.on_sync_error(&message));
                if let Err(log_error) = inner
                    .events
                    .append(EventKind::SyncFailed, json!({ "error": message }))
                    .await
                {
                    tracing::warn!(error = %log_error, "Failed to record sync failure");
                }
                Err(error)
            }
        }
    }

    /// Stop the current run; returns false when nothing is running
    ///
    /// The in-flight call is cancelled and its item left as it was.
    pub fn abort(&self) -> bool {
        match self.inner.cancel_slot().as_ref() {
            Some(token) => {
                tracing::info!("Aborting sync run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run(&self, token: &CancellationToken) -> Result<SyncResult> {
        let inner = &*self.inner;
        let started = Instant::now();
        tracing::info!("Sync run started");
        self.each_observer(|observer| observer.on_sync_start());
        inner.events.append(EventKind::SyncStarted, json!({})).await?;

        let batch_size = inner.config.sync.batch_size.max(1);
        let mut report = RunReport::default();
        let mut processed: HashSet<OperationId> = HashSet::new();
        let mut batches = 0_usize;
        let mut status = RunStatus::Completed;

        // Items rescheduled during the run are not picked up again; each pass
        // only sees items that became ready and were not yet handled.
        'run: loop {
            let now = inner.clock.now_ms();
            let ready: Vec<PendingOperation> = inner
                .queue
                .get_ready(now)
                .await?
                .into_iter()
                .filter(|operation| !processed.contains(&operation.id))
                .collect();
            if ready.is_empty() {
                break;
            }
            let total = processed.len() + ready.len();

            for batch in ready.chunks(batch_size) {
                if batches > 0 && !self.pause_between_batches(token).await {
                    status = RunStatus::Aborted;
                    break 'run;
                }
                batches += 1;

                for listed in batch {
                    if token.is_cancelled() {
                        status = RunStatus::Aborted;
                        break 'run;
                    }
                    processed.insert(listed.id);
                    // Earlier items may have re-keyed or removed this one
                    let Some(operation) = inner.queue.get(&listed.id).await? else {
                        continue;
                    };
                    if !operation.is_ready(inner.clock.now_ms()) {
                        continue;
                    }
                    if self.execute(&operation, token, &mut report).await? == ItemFlow::Aborted {
                        status = RunStatus::Aborted;
                        break 'run;
                    }
                }
                self.report_progress(processed.len(), total);
            }
        }

        inner.metadata.refresh(&inner.queue).await?;
        let success = status == RunStatus::Completed && report.errors.is_empty();
        let metadata = inner.metadata.record_run(success).await?;
        let duration = started.elapsed();

        inner
            .events
            .append(
                EventKind::SyncCompleted,
                json!({
                    "status": status,
                    "synced": report.synced,
                    "errors": report.errors.len(),
                    "conflicts": report.conflicts.len(),
                    "duration_ms": u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                }),
            )
            .await?;

        if !processed.is_empty() {
            self.notify(EngineEvent::QueueChanged);
        }
        self.notify(EngineEvent::MetadataChanged {
            metadata: metadata.clone(),
        });
        self.each_observer(|observer| observer.on_sync_complete(&metadata));

        tracing::info!(
            synced = report.synced,
            errors = report.errors.len(),
            conflicts = report.conflicts.len(),
            aborted = status == RunStatus::Aborted,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Sync run finished"
        );

        Ok(SyncResult {
            success,
            status,
            synced_count: report.synced,
            error_count: report.errors.len(),
            conflicts: report.conflicts,
            errors: report.errors,
            duration,
        })
    }

    /// Wait out the inter-batch delay; false when aborted meanwhile
    async fn pause_between_batches(&self, token: &CancellationToken) -> bool {
        let delay = self.inner.config.inter_batch_delay();
        if delay.is_zero() {
            return !token.is_cancelled();
        }
        tokio::select! {
            () = token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn report_progress(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = u8::try_from((done * 100 / total).min(100)).unwrap_or(100);
        self.each_observer(|observer| observer.on_sync_progress(percent));
    }

    async fn execute(
        &self,
        operation: &PendingOperation,
        token: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<ItemFlow> {
        let inner = &*self.inner;
        inner
            .records
            .set_status(
                &operation.entity_type,
                &operation.entity_id,
                RecordStatus::Syncing,
                None,
            )
            .await?;

        let timeout = inner.config.request_timeout();
        let request = RemoteRequest::from(operation);
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Err(RemoteError::Aborted),
            result = tokio::time::timeout(timeout, inner.remote.send(request)) => {
                result.unwrap_or(Err(RemoteError::Timeout(timeout)))
            }
        };

        match classify(operation.action, &outcome, inner.config.sync.client_error_policy) {
            Classification::Aborted => {
                inner
                    .records
                    .set_status(
                        &operation.entity_type,
                        &operation.entity_id,
                        RecordStatus::Pending,
                        None,
                    )
                    .await?;
                tracing::debug!(operation_id = %operation.id, "Remote call aborted");
                return Ok(ItemFlow::Aborted);
            }
            Classification::Success {
                server_id,
                server_data,
            } => {
                self.apply_success(operation, server_id, server_data, report)
                    .await?;
            }
            Classification::Conflict {
                server_data,
                message,
            } => {
                self.apply_conflict(operation, server_data, message, report)
                    .await?;
            }
            Classification::Retryable { kind, error } => {
                let outcome = AttemptOutcome::RetryableFailure {
                    error: error.clone(),
                };
                self.apply_failure(operation, outcome, kind, error, report)
                    .await?;
            }
            Classification::Terminal { kind, error } => {
                let outcome = AttemptOutcome::TerminalFailure {
                    error: error.clone(),
                };
                self.apply_failure(operation, outcome, kind, error, report)
                    .await?;
            }
        }
        Ok(ItemFlow::Continue)
    }

    async fn apply_success(
        &self,
        operation: &PendingOperation,
        server_id: Option<String>,
        server_data: Option<serde_json::Value>,
        report: &mut RunReport,
    ) -> Result<()> {
        let inner = &*self.inner;
        let entity_type = operation.entity_type.as_str();

        // Off the queue before anything else so a crash cannot replay it
        inner
            .queue
            .record_attempt(&operation.id, AttemptOutcome::Success)
            .await?;

        let mut synced_id = operation.entity_id.clone();
        match operation.action {
            SyncAction::Delete => {
                inner.records.delete(entity_type, &operation.entity_id).await?;
            }
            SyncAction::Create => {
                if let Some(server_id) = server_id.filter(|id| *id != operation.entity_id) {
                    let rewritten = inner
                        .queue
                        .rewrite_entity_id(entity_type, &operation.entity_id, &server_id)
                        .await?;
                    inner
                        .records
                        .rekey(entity_type, &operation.entity_id, &server_id)
                        .await?;
                    tracing::debug!(
                        entity_type,
                        local_id = %operation.entity_id,
                        server_id = %server_id,
                        rewritten,
                        "Adopted server id"
                    );
                    self.notify_record(entity_type, &operation.entity_id);
                    synced_id = server_id;
                }
                self.settle_record(entity_type, &synced_id, Some(synced_id.clone()))
                    .await?;
            }
            SyncAction::Update => {
                self.settle_record(entity_type, &synced_id, None).await?;
            }
        }

        if operation.action != SyncAction::Delete && inner.config.sync.is_reference_type(entity_type)
        {
            let data = server_data
                .filter(serde_json::Value::is_object)
                .unwrap_or_else(|| operation.payload.clone());
            inner.references.put(entity_type, &synced_id, data).await?;
        }

        inner
            .events
            .append_for_entity(
                EventKind::OperationSynced,
                entity_type,
                &synced_id,
                json!({ "operation_id": operation.id, "action": operation.action }),
            )
            .await?;
        tracing::debug!(
            operation_id = %operation.id,
            entity_type,
            entity_id = %synced_id,
            action = %operation.action,
            "Operation synced"
        );
        self.notify_record(entity_type, &synced_id);
        report.synced += 1;
        Ok(())
    }

    /// A record is `Synced` only once nothing is queued for it; otherwise it
    /// reflects the work that is left
    async fn settle_record(
        &self,
        entity_type: &str,
        entity_id: &str,
        server_id: Option<String>,
    ) -> Result<()> {
        let inner = &*self.inner;
        let remaining = inner.queue.for_entity(entity_type, entity_id).await?;
        if remaining.is_empty() {
            inner
                .records
                .mark_synced(entity_type, entity_id, server_id, None)
                .await?;
            return Ok(());
        }
        let status = remaining_status(&remaining);
        tracing::debug!(
            entity_type,
            entity_id,
            remaining = remaining.len(),
            status = %status,
            "Record still has queued operations"
        );
        inner
            .records
            .hold(entity_type, entity_id, status, server_id)
            .await?;
        Ok(())
    }

    async fn apply_conflict(
        &self,
        operation: &PendingOperation,
        server_data: Option<serde_json::Value>,
        message: String,
        report: &mut RunReport,
    ) -> Result<()> {
        let inner = &*self.inner;
        let entity_type = operation.entity_type.as_str();
        let entity_id = operation.entity_id.as_str();

        if inner.config.sync.is_reference_type(entity_type) {
            // Reference data is owned by the remote: server wins
            inner.queue.remove(&operation.id).await?;
            let now = inner.clock.now_ms();
            let mut conflict =
                ConflictResolution::detected(operation, server_data.clone(), message, now);
            conflict.resolution = Resolution::Server;
            conflict.resolved_at = Some(now);
            conflict.resolved_by = Some(AUTO_RESOLVER.to_string());
            inner.conflicts.save(&conflict).await?;

            inner
                .records
                .mark_synced(entity_type, entity_id, None, server_data.clone())
                .await?;
            if let Some(data) = server_data {
                inner.references.put(entity_type, entity_id, data).await?;
            }
            inner
                .events
                .append_for_entity(
                    EventKind::ConflictResolved,
                    entity_type,
                    entity_id,
                    json!({
                        "conflict_id": conflict.conflict_id,
                        "resolution": conflict.resolution,
                        "resolved_by": AUTO_RESOLVER,
                    }),
                )
                .await?;
            tracing::info!(entity_type, entity_id, "Reference conflict settled in favour of the remote");
            self.each_observer(|observer| observer.on_conflict_detected(&conflict));
            self.notify_record(entity_type, entity_id);
            report.conflicts.push(conflict);
            return Ok(());
        }

        let effect = inner
            .queue
            .record_attempt(
                &operation.id,
                AttemptOutcome::Conflict {
                    server_data,
                    message: message.clone(),
                },
            )
            .await?;
        let AttemptEffect::Conflicted(_, conflict) = effect else {
            return Ok(());
        };

        inner
            .records
            .set_status(entity_type, entity_id, RecordStatus::Conflict, Some(message))
            .await?;
        inner
            .events
            .append_for_entity(
                EventKind::ConflictDetected,
                entity_type,
                entity_id,
                json!({
                    "conflict_id": conflict.conflict_id,
                    "operation_id": operation.id,
                }),
            )
            .await?;
        tracing::warn!(
            operation_id = %operation.id,
            entity_type,
            entity_id,
            conflict_id = %conflict.conflict_id,
            "Conflict detected"
        );
        self.each_observer(|observer| observer.on_conflict_detected(&conflict));
        self.notify_record(entity_type, entity_id);
        report.conflicts.push(conflict);
        Ok(())
    }

    async fn apply_failure(
        &self,
        operation: &PendingOperation,
        outcome: AttemptOutcome,
        kind: FailureKind,
        error: String,
        report: &mut RunReport,
    ) -> Result<()> {
        let inner = &*self.inner;
        let effect = inner.queue.record_attempt(&operation.id, outcome).await?;
        let (kind, attempts, status) = match &effect {
            AttemptEffect::Exhausted(updated) => {
                let kind = if kind == FailureKind::Terminal {
                    kind
                } else {
                    FailureKind::Exhausted
                };
                (kind, updated.attempts, RecordStatus::Error)
            }
            AttemptEffect::Rescheduled(updated) => (kind, updated.attempts, RecordStatus::Retry),
            AttemptEffect::Removed | AttemptEffect::Conflicted(..) => {
                (kind, operation.attempts, RecordStatus::Retry)
            }
        };

        inner
            .records
            .set_status(
                &operation.entity_type,
                &operation.entity_id,
                status,
                Some(error.clone()),
            )
            .await?;
        inner
            .events
            .append_for_entity(
                EventKind::OperationFailed,
                &operation.entity_type,
                &operation.entity_id,
                json!({
                    "operation_id": operation.id,
                    "kind": kind,
                    "attempts": attempts,
                    "error": error,
                }),
            )
            .await?;
        tracing::warn!(
            operation_id = %operation.id,
            entity_type = %operation.entity_type,
            kind = %kind,
            attempts,
            error = %error,
            "Operation failed"
        );
        self.notify_record(&operation.entity_type, &operation.entity_id);

        report.errors.push(ItemError {
            operation_id: operation.id,
            action: operation.action,
            entity_type: operation.entity_type.clone(),
            entity_id: operation.entity_id.clone(),
            kind,
            message: error,
            attempts,
        });
        Ok(())
    }

    // Status and maintenance

    pub async fn get_status(&self) -> Result<SyncStatus> {
        let inner = &*self.inner;
        let is_online = inner.monitor.is_online();
        if !self.is_enabled() {
            return Ok(SyncStatus {
                is_enabled: false,
                is_online,
                is_syncing: false,
                pending_count: 0,
                last_sync: None,
                next_auto_sync: None,
            });
        }
        let metadata = inner.metadata.get().await?;
        Ok(SyncStatus {
            is_enabled: true,
            is_online,
            is_syncing: self.is_syncing(),
            pending_count: inner.queue.count_pending().await?,
            last_sync: metadata.last_sync,
            next_auto_sync: self.next_auto_sync(),
        })
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        self.inner.queue.stats().await
    }

    pub async fn get_metadata(&self) -> Result<SyncMetadata> {
        self.inner.metadata.get().await
    }

    /// Recompute and publish the metadata counts
    pub async fn refresh_metadata(&self) -> Result<SyncMetadata> {
        let metadata = self.inner.metadata.refresh(&self.inner.queue).await?;
        self.notify(EngineEvent::MetadataChanged {
            metadata: metadata.clone(),
        });
        Ok(metadata)
    }

    /// Drop exhausted items older than `max_age_days`
    pub async fn cleanup(&self, max_age_days: u32) -> Result<usize> {
        let inner = &*self.inner;
        let removed = inner.queue.cleanup(max_age_days).await?;
        let purged = inner.references.purge_expired().await?;
        inner
            .events
            .append(
                EventKind::Cleanup,
                json!({
                    "removed": removed,
                    "expired_references": purged,
                    "max_age_days": max_age_days,
                }),
            )
            .await?;
        tracing::info!(removed, purged, max_age_days, "Queue cleanup finished");
        if removed > 0 {
            self.notify(EngineEvent::QueueChanged);
        }
        self.refresh_metadata().await?;
        Ok(removed)
    }

    /// Drop audit events older than `max_age_days`
    pub async fn prune_events(&self, max_age_days: u32) -> Result<usize> {
        self.inner.events.prune(max_age_days).await
    }

    /// Give exhausted items a fresh budget
    pub async fn retry_failed(&self) -> Result<usize> {
        let inner = &*self.inner;
        let reset = inner.queue.retry_failed().await?;
        for operation in &reset {
            inner
                .records
                .set_status(
                    &operation.entity_type,
                    &operation.entity_id,
                    RecordStatus::Pending,
                    None,
                )
                .await?;
        }
        tracing::info!(count = reset.len(), "Reset failed operations");
        if !reset.is_empty() {
            self.notify(EngineEvent::QueueChanged);
        }
        self.refresh_metadata().await?;
        Ok(reset.len())
    }

    pub async fn list_conflicts(&self) -> Result<Vec<ConflictResolution>> {
        self.inner.conflicts.list_open().await
    }

    /// Settle an open conflict and release or drop its parked item
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        decision: ConflictDecision,
        resolved_by: &str,
    ) -> Result<ConflictResolution> {
        let inner = &*self.inner;
        let conflict = inner
            .conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if !conflict.is_open() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }
        let entity_type = conflict.entity_type.as_str();
        let entity_id = conflict.entity_id.as_str();

        match &decision {
            ConflictDecision::KeepLocal => {
                self.release_parked(&conflict, None).await?;
                inner
                    .records
                    .set_status(entity_type, entity_id, RecordStatus::Pending, None)
                    .await?;
            }
            ConflictDecision::AcceptServer => {
                inner.queue.remove(&conflict.operation_id).await?;
                inner
                    .records
                    .mark_synced(entity_type, entity_id, None, conflict.server_data.clone())
                    .await?;
                if let Some(data) = conflict.server_data.clone() {
                    if inner.config.sync.is_reference_type(entity_type) {
                        inner.references.put(entity_type, entity_id, data).await?;
                    }
                }
            }
            ConflictDecision::Merge(merged) => {
                self.release_parked(&conflict, Some(merged.clone())).await?;
                if conflict.action != SyncAction::Delete {
                    inner
                        .records
                        .save(entity_type, entity_id, merged.clone())
                        .await?;
                }
            }
        }

        let resolved = inner
            .conflicts
            .resolve(conflict_id, decision.resolution(), resolved_by)
            .await?;
        inner
            .events
            .append_for_entity(
                EventKind::ConflictResolved,
                entity_type,
                entity_id,
                json!({
                    "conflict_id": resolved.conflict_id,
                    "resolution": resolved.resolution,
                    "resolved_by": resolved_by,
                }),
            )
            .await?;
        tracing::info!(
            conflict_id,
            resolution = %resolved.resolution,
            resolved_by,
            "Conflict resolved"
        );
        self.notify(EngineEvent::QueueChanged);
        self.notify_record(entity_type, entity_id);
        self.refresh_metadata().await?;
        Ok(resolved)
    }

    /// Make the parked item eligible again, re-queueing it if it is gone
    async fn release_parked(
        &self,
        conflict: &ConflictResolution,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let inner = &*self.inner;
        if inner.queue.get(&conflict.operation_id).await?.is_some() {
            inner
                .queue
                .clear_conflict(&conflict.operation_id, payload)
                .await?;
            return Ok(());
        }
        inner
            .queue
            .enqueue(
                conflict.action,
                &conflict.entity_type,
                &conflict.entity_id,
                payload.unwrap_or_else(|| conflict.local_data.clone()),
                EnqueueOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Persist a connectivity change and tell subscribers
    pub async fn record_connectivity(&self, state: &ConnectivityState) -> Result<()> {
        let inner = &*self.inner;
        let metadata = inner.metadata.set_online(state.is_online).await?;
        inner
            .events
            .append(
                EventKind::ConnectivityChanged,
                json!({
                    "online": state.is_online,
                    "quality": state.quality,
                    "latency_ms": state.latency_ms,
                }),
            )
            .await?;
        self.notify(EngineEvent::ConnectivityChanged {
            state: state.clone(),
        });
        self.notify(EngineEvent::MetadataChanged { metadata });
        Ok(())
    }

    pub fn next_auto_sync(&self) -> Option<i64> {
        match self.inner.next_auto_sync.load(Ordering::SeqCst) {
            NO_AUTO_SYNC => None,
            at => Some(at),
        }
    }

    pub(super) fn set_next_auto_sync(&self, at: Option<i64>) {
        self.inner
            .next_auto_sync
            .store(at.unwrap_or(NO_AUTO_SYNC), Ordering::SeqCst);
    }
}

/// Record status implied by the operations still queued for it
fn remaining_status(remaining: &[PendingOperation]) -> RecordStatus {
    if remaining.iter().any(PendingOperation::is_conflicted) {
        RecordStatus::Conflict
    } else if remaining.iter().any(PendingOperation::is_exhausted) {
        RecordStatus::Error
    } else if remaining.iter().any(|operation| operation.attempts > 0) {
        RecordStatus::Retry
    } else {
        RecordStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Priority;
    use crate::remote::RemoteResponse;
    use crate::testing::ScriptedRemote;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    async fn engine(remote: Arc<ScriptedRemote>) -> SyncEngine {
        let store = DurableStore::open_in_memory().await.unwrap();
        let config = EngineConfig::default()
            .with_inter_batch_delay(Duration::ZERO)
            .without_auto_sync();
        SyncEngine::with_clock(store, remote, config, Arc::new(ManualClock::new(1_000))).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_writes_record_and_metadata() {
        let engine = engine(Arc::new(ScriptedRemote::new())).await;
        let mut changes = engine.subscribe();

        engine
            .create_record("price", "p-1", json!({"amount": 5}), EnqueueOptions::default())
            .await
            .unwrap();

        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(engine.get_metadata().await.unwrap().total_offline_actions, 1);
        assert_eq!(changes.recv().await.unwrap(), EngineEvent::QueueChanged);
        assert_eq!(
            engine.events().list_by_kind(EventKind::Enqueued).await.unwrap().len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_marks_records_synced() {
        let remote = Arc::new(ScriptedRemote::new());
        let engine = engine(remote.clone()).await;
        engine
            .update_record("price", "p-1", json!({"amount": 5}), EnqueueOptions::default())
            .await
            .unwrap();

        let result = engine.sync(SyncOptions::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.synced_count, 1);

        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Synced);
        assert!(engine.queue().list().await.unwrap().is_empty());

        let status = engine.get_status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.last_sync, Some(1_000));
        assert!(!status.is_syncing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_adopts_server_id() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(
            "tmp-1",
            Ok(RemoteResponse::new(201).with_body(json!({"id": "srv-1"}))),
        );
        let engine = engine(remote.clone()).await;
        engine
            .create_record("price", "tmp-1", json!({"amount": 1}), EnqueueOptions::default())
            .await
            .unwrap();
        engine
            .update_record("price", "tmp-1", json!({"amount": 2}), EnqueueOptions::default())
            .await
            .unwrap();

        engine.sync(SyncOptions::default()).await.unwrap();

        assert_eq!(engine.records().get("price", "tmp-1").await.unwrap(), None);
        let record = engine.records().require("price", "srv-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Synced);
        assert_eq!(record.data, json!({"amount": 2}));
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].entity_id, "srv-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_of_unsynced_entity_stays_local() {
        let remote = Arc::new(ScriptedRemote::new());
        let engine = engine(remote.clone()).await;
        engine
            .create_record("price", "tmp-1", json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let queued = engine
            .delete_record("price", "tmp-1", EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(queued, None);
        assert!(engine.queue().list().await.unwrap().is_empty());

        engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_uses_server_id() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(
            "tmp-1",
            Ok(RemoteResponse::new(201).with_body(json!({"id": 77}))),
        );
        let engine = engine(remote.clone()).await;
        engine
            .create_record("price", "tmp-1", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        engine.sync(SyncOptions::default()).await.unwrap();

        let queued = engine
            .delete_record("price", "77", EnqueueOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.entity_id, "77");
        assert_eq!(queued.action, SyncAction::Delete);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_conflict_keep_local_requeues() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(
            "p-1",
            Ok(RemoteResponse::new(409).with_body(json!({"amount": 9}))),
        );
        let engine = engine(remote.clone()).await;
        engine
            .update_record("price", "p-1", json!({"amount": 1}), EnqueueOptions::default())
            .await
            .unwrap();

        let result = engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.success);
        let conflict_id = result.conflicts[0].conflict_id.clone();
        assert_eq!(
            engine.records().require("price", "p-1").await.unwrap().status,
            RecordStatus::Conflict
        );
        assert_eq!(engine.get_metadata().await.unwrap().conflict_count, 1);

        let resolved = engine
            .resolve_conflict(&conflict_id, ConflictDecision::KeepLocal, "tester")
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Resolution::Local);
        assert_eq!(engine.get_metadata().await.unwrap().conflict_count, 0);

        let result = engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(result.synced_count, 1);
        assert_eq!(remote.calls_for("p-1"), 2);

        assert!(matches!(
            engine
                .resolve_conflict(&conflict_id, ConflictDecision::AcceptServer, "tester")
                .await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_accept_server_drops_item() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(
            "p-1",
            Ok(RemoteResponse::new(409).with_body(json!({"amount": 9}))),
        );
        let engine = engine(remote.clone()).await;
        engine
            .update_record("price", "p-1", json!({"amount": 1}), EnqueueOptions::default())
            .await
            .unwrap();
        let result = engine.sync(SyncOptions::default()).await.unwrap();

        engine
            .resolve_conflict(
                &result.conflicts[0].conflict_id,
                ConflictDecision::AcceptServer,
                "tester",
            )
            .await
            .unwrap();

        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Synced);
        assert_eq!(record.data, json!({"amount": 9}));
        assert!(engine.queue().list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reference_conflict_resolves_server_wins() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(
            "m-1",
            Ok(RemoteResponse::new(409).with_body(json!({"name": "server"}))),
        );
        let engine = engine(remote.clone()).await;
        engine
            .update_record("reference", "m-1", json!({"name": "local"}), EnqueueOptions::default())
            .await
            .unwrap();

        let result = engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].resolution, Resolution::Server);
        assert!(engine.list_conflicts().await.unwrap().is_empty());

        let cached = engine.references().get("reference", "m-1").await.unwrap().unwrap();
        assert_eq!(cached.data, json!({"name": "server"}));
        assert!(engine.queue().list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_observers_see_progress() {
        let remote = Arc::new(ScriptedRemote::new());
        let engine = engine(remote.clone()).await;
        let completions = Arc::new(AtomicUsize::new(0));
        let last_progress = Arc::new(AtomicUsize::new(0));
        let (done, progress) = (completions.clone(), last_progress.clone());
        engine.add_observer(Arc::new(
            super::super::SyncCallbacks::new()
                .on_complete(move |_| {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .on_progress(move |percent| {
                    progress.store(usize::from(percent), Ordering::SeqCst);
                }),
        ));
        for id in ["a", "b", "c"] {
            engine
                .update_record("price", id, json!({}), EnqueueOptions::default())
                .await
                .unwrap();
        }

        engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(last_progress.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_store_refuses_sync() {
        let config = EngineConfig::default().without_auto_sync();
        let store = DurableStore::disabled("read-only volume");
        let engine = SyncEngine::new(store, Arc::new(ScriptedRemote::new()), config).unwrap();
        assert!(!engine.is_enabled());
        assert!(matches!(
            engine.sync(SyncOptions::default()).await,
            Err(Error::SyncDisabled)
        ));
        assert!(!engine.get_status().await.unwrap().is_enabled);
        assert!(!engine.abort());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_waits_for_every_queued_operation() {
        let store = DurableStore::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let config = EngineConfig::default()
            .with_inter_batch_delay(Duration::ZERO)
            .without_auto_sync();
        let engine =
            SyncEngine::with_clock(store, Arc::new(ScriptedRemote::new()), config, clock.clone())
                .unwrap();
        engine
            .create_record("price", "p-1", json!({"amount": 1}), EnqueueOptions::default())
            .await
            .unwrap();
        engine
            .update_record(
                "price",
                "p-1",
                json!({"amount": 2}),
                EnqueueOptions::default().with_delay(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        let result = engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(result.synced_count, 1);
        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.synced_at, None);
        assert_eq!(record.server_id.as_deref(), Some("p-1"));
        assert_eq!(record.data, json!({"amount": 2}));

        clock.advance(Duration::from_secs(60));
        engine.sync(SyncOptions::default()).await.unwrap();
        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Synced);
        assert_eq!(record.synced_at, Some(61_000));
    }

    #[test]
    fn remaining_work_picks_record_status() {
        let mut operation = PendingOperation {
            id: OperationId::new(),
            action: SyncAction::Update,
            entity_type: "price".to_string(),
            entity_id: "p-1".to_string(),
            payload: json!({}),
            priority: Priority::Normal,
            attempts: 0,
            max_attempts: 3,
            next_retry_at: 0,
            created_at: 0,
            last_attempt_at: None,
            last_error: None,
            conflict_id: None,
        };
        assert_eq!(remaining_status(&[operation.clone()]), RecordStatus::Pending);
        operation.attempts = 1;
        assert_eq!(remaining_status(&[operation.clone()]), RecordStatus::Retry);
        operation.attempts = 3;
        assert_eq!(remaining_status(&[operation.clone()]), RecordStatus::Error);
        operation.conflict_id = Some("c-1".to_string());
        assert_eq!(remaining_status(&[operation]), RecordStatus::Conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_sends_merged_payload() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(
            "p-1",
            Ok(RemoteResponse::new(409).with_body(json!({"amount": 9}))),
        );
        let engine = engine(remote.clone()).await;
        engine
            .update_record("price", "p-1", json!({"amount": 1}), EnqueueOptions::default())
            .await
            .unwrap();
        let result = engine.sync(SyncOptions::default()).await.unwrap();
        let conflict_id = result.conflicts[0].conflict_id.clone();

        let merged = json!({"amount": 5});
        let resolved = engine
            .resolve_conflict(&conflict_id, ConflictDecision::Merge(merged.clone()), "tester")
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Resolution::Merge);
        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.data, merged);
        assert_eq!(record.status, RecordStatus::Pending);

        let result = engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(result.synced_count, 1);
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].payload, merged);

        let record = engine.records().require("price", "p-1").await.unwrap();
        assert_eq!(record.status, RecordStatus::Synced);
        assert_eq!(record.data, merged);
        assert!(engine.queue().list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolution_requeues_missing_operation() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push_status("p-1", 409);
        let engine = engine(remote.clone()).await;
        let operation = engine
            .update_record("price", "p-1", json!({"amount": 1}), EnqueueOptions::default())
            .await
            .unwrap();
        let result = engine.sync(SyncOptions::default()).await.unwrap();
        let conflict_id = result.conflicts[0].conflict_id.clone();

        assert!(engine.queue().remove(&operation.id).await.unwrap());
        engine
            .resolve_conflict(&conflict_id, ConflictDecision::KeepLocal, "tester")
            .await
            .unwrap();

        let queued = engine.queue().list().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_ne!(queued[0].id, operation.id);
        assert_eq!(queued[0].action, SyncAction::Update);
        assert_eq!(queued[0].payload, json!({"amount": 1}));
        assert_eq!(queued[0].conflict_id, None);

        engine.sync(SyncOptions::default()).await.unwrap();
        assert_eq!(remote.calls_for("p-1"), 2);
        assert_eq!(
            engine.records().require("price", "p-1").await.unwrap().status,
            RecordStatus::Synced
        );
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Price {
        id: String,
        amount: u32,
    }

    impl Entity for Price {
        const ENTITY_TYPE: &'static str = "price";

        fn entity_id(&self) -> String {
            self.id.clone()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_typed_entities_round_trip_through_records() {
        let engine = engine(Arc::new(ScriptedRemote::new())).await;
        let mut price = Price {
            id: "p-1".to_string(),
            amount: 3,
        };

        let created = engine
            .create_entity(&price, EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(created.action, SyncAction::Create);
        assert_eq!(created.entity_type, "price");

        price.amount = 4;
        engine
            .update_entity(&price, EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(engine.load_entity::<Price>("p-1").await.unwrap(), Some(price));
        assert_eq!(engine.load_entity::<Price>("p-2").await.unwrap(), None);
        assert_eq!(engine.queue().list().await.unwrap().len(), 2);
    }
}
