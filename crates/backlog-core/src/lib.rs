//! backlog-core - Core library for Backlog
//!
//! An offline-first sync engine: local writes land in a durable store and a
//! pending-operation queue, and a single orchestrator drains that queue
//! against a remote authority once connectivity allows. Used by the CLI and
//! by any host that embeds the engine.

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod remote;
pub mod stores;
pub mod sync;
pub mod testing;
pub mod util;

pub use config::EngineConfig;
pub use db::DurableStore;
pub use error::{Error, RemoteError, Result, StorageError};
pub use models::{EnqueueOptions, OperationId, PendingOperation, Priority, SyncAction};
pub use sync::{SyncEngine, SyncOptions, SyncResult, SyncStatus};
