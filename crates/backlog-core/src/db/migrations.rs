//! Database migrations
//!
//! Each logical table stores its record as JSON in `value` next to the
//! indexed columns listed by [`Table::indexes`](super::Table::indexes).
//! Migrations only ever add; rows written by older versions are kept and
//! their new index columns are backfilled from the JSON.

use crate::error::StorageError;
use libsql::Connection;

/// Current schema version
pub(crate) const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<(), StorageError> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
pub(crate) async fn get_version(conn: &Connection) -> Result<i32, StorageError> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run `statements` in one transaction and record `version`
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<(), StorageError> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<(), StorageError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS offline_records (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            entity_type TEXT,
            status TEXT,
            created_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_offline_records_entity_type ON offline_records(entity_type)",
        "CREATE INDEX IF NOT EXISTS idx_offline_records_status ON offline_records(status)",
        "CREATE INDEX IF NOT EXISTS idx_offline_records_created ON offline_records(created_at)",
        "CREATE TABLE IF NOT EXISTS pending_operations (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            priority INTEGER,
            entity_type TEXT,
            next_retry_at INTEGER,
            attempts INTEGER,
            created_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_priority ON pending_operations(priority)",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_entity_type ON pending_operations(entity_type)",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_next_retry ON pending_operations(next_retry_at)",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_attempts ON pending_operations(attempts)",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_created ON pending_operations(created_at)",
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS conflicts (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            entity_type TEXT,
            is_open INTEGER,
            created_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_entity_type ON conflicts(entity_type)",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_open ON conflicts(is_open)",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_created ON conflicts(created_at DESC)",
        "CREATE TABLE IF NOT EXISTS reference_cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            entity_type TEXT,
            expires_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_reference_cache_entity_type ON reference_cache(entity_type)",
        "CREATE INDEX IF NOT EXISTS idx_reference_cache_expires ON reference_cache(expires_at)",
        "CREATE TABLE IF NOT EXISTS events (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            timestamp INTEGER,
            kind TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind)",
    ];

    apply(conn, 1, &statements).await
}

/// Migration to version 2: entity and conflict lookups on the queue
async fn migrate_v2(conn: &Connection) -> Result<(), StorageError> {
    let statements = [
        "ALTER TABLE pending_operations ADD COLUMN entity_id TEXT",
        "ALTER TABLE pending_operations ADD COLUMN conflicted INTEGER NOT NULL DEFAULT 0",
        "UPDATE pending_operations SET
            entity_id = json_extract(value, '$.entity_id'),
            conflicted = CASE WHEN json_extract(value, '$.conflict_id') IS NULL THEN 0 ELSE 1 END",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_entity ON pending_operations(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_conflicted ON pending_operations(conflicted)",
    ];

    apply(conn, 2, &statements).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?1
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_tables_created() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in super::super::Table::ALL {
            assert!(table_exists(&conn, table.name()).await, "{}", table.name());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migration_v2_keeps_rows_and_backfills_index() {
        let conn = setup().await;
        migrate_v1(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO pending_operations (key, value, priority, entity_type, next_retry_at, attempts, created_at)
             VALUES ('op-1', ?1, 3, 'price', 0, 0, 0)",
            [r#"{"entity_id":"price-7","conflict_id":"c-1"}"#],
        )
        .await
        .unwrap();

        run(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT entity_id, conflicted FROM pending_operations WHERE key = 'op-1'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "price-7");
        assert_eq!(row.get::<i64>(1).unwrap(), 1);
    }
}
