//! Background triggers: the periodic timer and the reconnect edge.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{SyncEngine, SyncOptions};
use crate::connectivity::ConnectivityState;
use crate::error::Error;
use crate::util::duration_to_ms;

/// Timer period while the interval trigger is disabled
const IDLE_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Stops automatic sync when dropped
pub struct AutoSyncHandle {
    _guard: DropGuard,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Stop triggering and wait for the loop to exit; a run in progress is aborted
    pub async fn shutdown(self) {
        let Self {
            _guard: guard,
            task,
        } = self;
        drop(guard);
        let _ = task.await;
    }
}

impl SyncEngine {
    /// Sync on a timer and whenever connectivity comes back
    ///
    /// Each trigger only fires when the engine is online and idle.
    pub fn start_auto_sync(&self) -> AutoSyncHandle {
        let token = CancellationToken::new();
        let engine = self.clone();
        let cancel = token.clone();
        let mut changes = self.inner.monitor.subscribe();
        let online = changes.borrow_and_update().is_online;
        let task =
            tokio::spawn(async move { engine.auto_sync_loop(cancel, changes, online).await });
        AutoSyncHandle {
            _guard: token.drop_guard(),
            task,
        }
    }

    async fn auto_sync_loop(
        &self,
        cancel: CancellationToken,
        mut changes: watch::Receiver<ConnectivityState>,
        mut was_online: bool,
    ) {
        let interval = self.inner.config.auto_sync_interval();
        let debounce = self.inner.config.reconnect_debounce();

        // Without an interval the timer arm never fires
        let mut ticker = tokio::time::interval(interval.unwrap_or(IDLE_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; start one period out
        ticker.tick().await;
        self.schedule_next(interval);
        tracing::debug!(interval = ?interval, "Auto-sync started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick(), if interval.is_some() => {
                    self.trigger("timer", &cancel).await;
                    self.schedule_next(interval);
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = changes.borrow_and_update().clone();
                    if let Err(error) = self.record_connectivity(&state).await {
                        tracing::warn!(%error, "Failed to record connectivity change");
                    }
                    let reconnected = state.is_online && !was_online;
                    was_online = state.is_online;
                    if reconnected {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(debounce) => {}
                        }
                        self.trigger("reconnect", &cancel).await;
                    }
                }
            }
        }

        self.set_next_auto_sync(None);
        tracing::debug!("Auto-sync stopped");
    }

    fn schedule_next(&self, interval: Option<Duration>) {
        let next = interval.map(|every| {
            self.inner
                .clock
                .now_ms()
                .saturating_add(duration_to_ms(every))
        });
        self.set_next_auto_sync(next);
    }

    async fn trigger(&self, trigger: &'static str, cancel: &CancellationToken) {
        if cancel.is_cancelled() || !self.inner.monitor.is_online() || self.is_syncing() {
            tracing::debug!(trigger, "Auto-sync skipped");
            return;
        }
        let run = self.sync(SyncOptions::default());
        tokio::pin!(run);
        let result = tokio::select! {
            result = &mut run => result,
            () = cancel.cancelled() => {
                self.abort();
                run.await
            }
        };
        match result {
            Ok(result) => tracing::debug!(
                trigger,
                synced = result.synced_count,
                errors = result.error_count,
                "Auto-sync finished"
            ),
            Err(Error::AlreadySyncing | Error::Offline) => {
                tracing::debug!(trigger, "Auto-sync skipped");
            }
            Err(error) => tracing::warn!(%error, trigger, "Auto-sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::db::DurableStore;
    use crate::error::RemoteError;
    use crate::models::{EnqueueOptions, EventKind};
    use crate::testing::ScriptedRemote;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_triggers_sync() {
        let remote = Arc::new(ScriptedRemote::new());
        let store = DurableStore::open_in_memory().await.unwrap();
        let mut config = EngineConfig::default()
            .without_auto_sync()
            .with_initially_online(false)
            .with_inter_batch_delay(Duration::ZERO);
        config.sync.reconnect_debounce_ms = 10;
        let engine =
            SyncEngine::with_clock(store, remote.clone(), config, Arc::new(ManualClock::new(5)))
                .unwrap();
        engine
            .update_record("price", "p-1", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let handle = engine.start_auto_sync();
        assert_eq!(engine.next_auto_sync(), None);
        engine.monitor().set_online(true);

        let mut drained = false;
        for _ in 0..100 {
            if engine.queue().count_pending().await.unwrap() == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.shutdown().await;

        assert!(drained);
        assert_eq!(remote.calls_for("p-1"), 1);
        assert!(engine.get_metadata().await.unwrap().is_online);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_only_transitions_reach_the_audit_log() {
        let remote = Arc::new(ScriptedRemote::new());
        let store = DurableStore::open_in_memory().await.unwrap();
        let config = EngineConfig::default().without_auto_sync();
        let engine =
            SyncEngine::with_clock(store, remote.clone(), config, Arc::new(ManualClock::new(5)))
                .unwrap();
        let handle = engine.start_auto_sync();

        for _ in 0..5 {
            assert!(engine.monitor().probe_now().await.is_online);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let logged = engine
            .events()
            .list_by_kind(EventKind::ConnectivityChanged)
            .await
            .unwrap();
        assert!(logged.is_empty());

        remote.set_probe(Err(RemoteError::Network("refused".to_string())));
        engine.monitor().probe_now().await;
        engine.monitor().probe_now().await;
        let mut count = 0;
        for _ in 0..50 {
            count = engine
                .events()
                .list_by_kind(EventKind::ConnectivityChanged)
                .await
                .unwrap()
                .len();
            if count > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(count, 1);
        assert!(!engine.get_metadata().await.unwrap().is_online);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_interval_schedules_next_run() {
        let store = DurableStore::open_in_memory().await.unwrap();
        let config = EngineConfig::default().with_auto_sync_interval(Duration::from_secs(60));
        let engine = SyncEngine::with_clock(
            store,
            Arc::new(ScriptedRemote::new()),
            config,
            Arc::new(ManualClock::new(1_000)),
        )
        .unwrap();

        let handle = engine.start_auto_sync();
        for _ in 0..50 {
            if engine.next_auto_sync().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.next_auto_sync(), Some(61_000));
        handle.shutdown().await;
        assert_eq!(engine.next_auto_sync(), None);
    }
}
