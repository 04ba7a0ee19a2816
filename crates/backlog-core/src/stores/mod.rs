//! Logical views over the durable store

mod conflicts;
mod events;
mod metadata;
mod records;
mod reference;

pub use conflicts::ConflictStore;
pub use events::EventLog;
pub use metadata::MetadataManager;
pub use records::OfflineRecordStore;
pub use reference::ReferenceCache;
