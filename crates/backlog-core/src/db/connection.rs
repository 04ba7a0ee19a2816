//! Database connection management

use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;
use crate::error::StorageError;

/// Database wrapper for libSQL connections
pub struct Database {
    // Keeps the underlying database alive for the connection's lifetime
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. Failing to open or migrate is reported
    /// as [`StorageError::Unavailable`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        Self::open_local(&path_str).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        Self::open_local(":memory:").await
    }

    async fn open_local(path: &str) -> Result<Self, StorageError> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Unavailable(format!("cannot open {path}: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StorageError::Unavailable(format!("cannot connect to {path}: {e}")))?;

        let database = Self { _db: db, conn };
        database.configure().await;
        database
            .initialize()
            .await
            .map_err(|e| StorageError::Unavailable(format!("cannot migrate {path}: {e}")))?;
        tracing::debug!(path, "Opened durable store");
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) {
        // Pragmas that return rows are not accepted by every build; ignore failures
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA cache_size = 10000;", ())
            .await
            .ok();
    }

    /// Create or upgrade the schema
    ///
    /// Safe to call repeatedly; versions already applied are skipped.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
