//! Durable store: typed tables over libSQL
//!
//! Every operation is a single SQL statement, so it is atomic with respect
//! to other operations on the same table. Callers must not assume isolation
//! across several calls.

use std::path::Path;
use std::sync::Arc;

use libsql::{params_from_iter, Connection, Rows, Value};

use super::connection::Database;
use super::table::{IndexRange, Query, Record, Table};
use crate::error::StorageError;

enum StoreState {
    Ready(Database),
    Unavailable(String),
}

/// Shared handle to the local durable store
///
/// Cloning is cheap; all clones talk to the same connection.
#[derive(Clone)]
pub struct DurableStore {
    state: Arc<StoreState>,
}

impl DurableStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::from_database(Database::open(path).await?))
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self::from_database(Database::open_in_memory().await?))
    }

    /// Open the store at `path`, degrading to a disabled store on failure
    ///
    /// A disabled store answers every operation with
    /// [`StorageError::Unavailable`] instead of crashing the host.
    pub async fn open_or_disabled(path: impl AsRef<Path>) -> Self {
        match Self::open(path).await {
            Ok(store) => store,
            Err(error) => {
                tracing::error!(%error, "Durable store unavailable, sync disabled");
                Self::disabled(error.to_string())
            }
        }
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            state: Arc::new(StoreState::Ready(db)),
        }
    }

    /// A store that refuses every operation
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            state: Arc::new(StoreState::Unavailable(reason.into())),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(*self.state, StoreState::Ready(_))
    }

    /// Re-run schema initialization; a no-op when already current
    pub async fn initialize(&self) -> Result<(), StorageError> {
        match &*self.state {
            StoreState::Ready(db) => db.initialize().await,
            StoreState::Unavailable(reason) => Err(StorageError::Unavailable(reason.clone())),
        }
    }

    fn connection(&self) -> Result<&Connection, StorageError> {
        match &*self.state {
            StoreState::Ready(db) => Ok(db.connection()),
            StoreState::Unavailable(reason) => Err(StorageError::Unavailable(reason.clone())),
        }
    }

    /// Insert or replace `value` under its key
    ///
    /// Replacing keeps the row's insertion position, so full scans stay in
    /// first-insert order.
    pub async fn put<T: Record>(&self, value: &T) -> Result<(), StorageError> {
        let conn = self.connection()?;
        let table = T::TABLE;
        let columns = table.indexes();

        let column_list = columns.iter().map(|c| format!(", {c}")).collect::<String>();
        let placeholders = (0..columns.len())
            .map(|i| format!(", ?{}", i + 3))
            .collect::<String>();
        let updates = columns
            .iter()
            .map(|c| format!(", {c} = excluded.{c}"))
            .collect::<String>();
        let sql = format!(
            "INSERT INTO {name} (key, value{column_list}) VALUES (?1, ?2{placeholders})
             ON CONFLICT(key) DO UPDATE SET value = excluded.value{updates}",
            name = table.name()
        );

        let mut params = Vec::with_capacity(columns.len() + 2);
        params.push(Value::Text(value.key()));
        params.push(Value::Text(serde_json::to_string(value)?));
        params.extend(
            columns
                .iter()
                .map(|column| value.index_value(column).map_or(Value::Null, Value::from)),
        );

        conn.execute(&sql, params_from_iter(params)).await?;
        Ok(())
    }

    /// Fetch a single value by key
    pub async fn get<T: Record>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let conn = self.connection()?;
        let sql = format!("SELECT value FROM {} WHERE key = ?1", T::TABLE.name());
        let rows = conn.query(&sql, [key]).await?;
        Ok(decode_rows::<T>(rows).await?.pop())
    }

    /// Load every value of the table, then apply `query`
    pub async fn get_all<T: Record>(&self, query: Query<T>) -> Result<Vec<T>, StorageError> {
        let conn = self.connection()?;
        let sql = format!("SELECT value FROM {} ORDER BY rowid", T::TABLE.name());
        let rows = conn.query(&sql, ()).await?;
        Ok(query.apply(decode_rows::<T>(rows).await?))
    }

    /// Load values whose `index` column falls in `range`, then apply `query`
    ///
    /// Results come back ordered by the index column, ties in insertion order.
    pub async fn get_by_index<T: Record>(
        &self,
        index: &str,
        range: IndexRange,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError> {
        let conn = self.connection()?;
        let column = checked_index(T::TABLE, index)?;
        let (condition, params) = range.to_sql(column);
        let sql = format!(
            "SELECT value FROM {} WHERE {condition} ORDER BY {column}, rowid",
            T::TABLE.name()
        );
        let rows = conn.query(&sql, params_from_iter(params)).await?;
        Ok(query.apply(decode_rows::<T>(rows).await?))
    }

    /// Count rows whose `index` column falls in `range`
    pub async fn count_by_index<T: Record>(
        &self,
        index: &str,
        range: IndexRange,
    ) -> Result<usize, StorageError> {
        let conn = self.connection()?;
        let column = checked_index(T::TABLE, index)?;
        let (condition, params) = range.to_sql(column);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {condition}",
            T::TABLE.name()
        );
        let mut rows = conn.query(&sql, params_from_iter(params)).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|_| StorageError::Corrupt(format!("negative count {count}")))
    }

    /// Delete the value stored under `key`; returns whether it existed
    pub async fn delete<T: Record>(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let sql = format!("DELETE FROM {} WHERE key = ?1", T::TABLE.name());
        let affected = conn.execute(&sql, [key]).await?;
        Ok(affected > 0)
    }
}

fn checked_index(table: Table, index: &str) -> Result<&'static str, StorageError> {
    table
        .indexes()
        .iter()
        .copied()
        .find(|column| *column == index)
        .ok_or_else(|| StorageError::UnknownIndex {
            table: table.name(),
            index: index.to_string(),
        })
}

async fn decode_rows<T: Record>(mut rows: Rows) -> Result<Vec<T>, StorageError> {
    let mut values = Vec::new();
    while let Some(row) = rows.next().await? {
        let raw: String = row.get(0)?;
        values.push(serde_json::from_str(&raw)?);
    }
    Ok(values)
}
