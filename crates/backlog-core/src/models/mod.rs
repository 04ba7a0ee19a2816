//! Data models for Backlog

mod conflict;
mod entity;
mod event;
mod metadata;
mod operation;
mod record;
mod reference;

pub use conflict::{ConflictDecision, ConflictResolution, Resolution};
pub use entity::Entity;
pub use event::{AuditEvent, EventKind};
pub use metadata::{SyncMetadata, SYNC_METADATA_KEY};
pub use operation::{EnqueueOptions, OperationId, PendingOperation, Priority, SyncAction};
pub use record::{record_key, OfflineRecord, RecordStatus};
pub use reference::ReferenceEntry;
