//! Lifecycle callbacks and change notifications

use serde::Serialize;

use crate::connectivity::ConnectivityState;
use crate::models::{ConflictResolution, SyncMetadata};

/// Best-effort run notifications
///
/// Callbacks run inline on the sync task and must return quickly.
pub trait SyncObserver: Send + Sync {
    fn on_sync_start(&self) {}

    /// Share of the run's items handled so far, `0..=100`
    fn on_sync_progress(&self, _percent: u8) {}

    fn on_sync_complete(&self, _metadata: &SyncMetadata) {}

    fn on_sync_error(&self, _message: &str) {}

    fn on_conflict_detected(&self, _conflict: &ConflictResolution) {}
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Closure-based observer
#[derive(Default)]
pub struct SyncCallbacks {
    on_start: Option<Box<dyn Fn() + Send + Sync>>,
    on_progress: Option<Callback<u8>>,
    on_complete: Option<Box<dyn Fn(&SyncMetadata) + Send + Sync>>,
    on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_conflict: Option<Box<dyn Fn(&ConflictResolution) + Send + Sync>>,
}

impl SyncCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_start(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, callback: impl Fn(&SyncMetadata) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_conflict(
        mut self,
        callback: impl Fn(&ConflictResolution) + Send + Sync + 'static,
    ) -> Self {
        self.on_conflict = Some(Box::new(callback));
        self
    }
}

impl SyncObserver for SyncCallbacks {
    fn on_sync_start(&self) {
        if let Some(callback) = &self.on_start {
            callback();
        }
    }

    fn on_sync_progress(&self, percent: u8) {
        if let Some(callback) = &self.on_progress {
            callback(percent);
        }
    }

    fn on_sync_complete(&self, metadata: &SyncMetadata) {
        if let Some(callback) = &self.on_complete {
            callback(metadata);
        }
    }

    fn on_sync_error(&self, message: &str) {
        if let Some(callback) = &self.on_error {
            callback(message);
        }
    }

    fn on_conflict_detected(&self, conflict: &ConflictResolution) {
        if let Some(callback) = &self.on_conflict {
            callback(conflict);
        }
    }
}

/// Change notification for read-models layered over the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    QueueChanged,
    RecordChanged {
        entity_type: String,
        entity_id: String,
    },
    MetadataChanged {
        metadata: SyncMetadata,
    },
    ConnectivityChanged {
        state: ConnectivityState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    #[test]
    fn callbacks_forward_to_closures() {
        let last = Arc::new(AtomicU8::new(0));
        let seen = last.clone();
        let callbacks = SyncCallbacks::new().on_progress(move |percent| {
            seen.store(percent, Ordering::SeqCst);
        });

        callbacks.on_sync_start();
        callbacks.on_sync_progress(40);
        callbacks.on_sync_error("ignored");
        assert_eq!(last.load(Ordering::SeqCst), 40);
    }
}
