//! Error types for backlog-core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using backlog-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the durable store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Local persistence could not be opened or written
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    Database(#[from] libsql::Error),

    /// Value (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Query against an index the table does not declare
    #[error("Unknown index '{index}' on table '{table}'")]
    UnknownIndex {
        table: &'static str,
        index: String,
    },

    /// Stored row could not be interpreted
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether the store itself is gone (as opposed to a single failed query)
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors that can occur in backlog-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A sync run is already in progress
    #[error("Sync already in progress")]
    AlreadySyncing,

    /// The store could not be opened, so sync is disabled
    #[error("Sync disabled: local storage is unavailable")]
    SyncDisabled,

    /// The connectivity monitor reports the remote as unreachable
    #[error("Remote authority is unreachable")]
    Offline,

    /// Entity or queue item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport-level failures talking to the remote authority
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, reset, ...
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete within its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled by an abort request
    #[error("Request aborted")]
    Aborted,

    /// The remote answered with something that could not be read
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}
