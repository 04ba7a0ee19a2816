//! Logical tables, index ranges and post-filter queries

use std::cmp::Ordering;
use std::ops::Bound;

use libsql::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The logical tables kept by the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    OfflineRecords,
    PendingOperations,
    SyncMetadata,
    Conflicts,
    ReferenceCache,
    Events,
}

impl Table {
    pub const ALL: [Self; 6] = [
        Self::OfflineRecords,
        Self::PendingOperations,
        Self::SyncMetadata,
        Self::Conflicts,
        Self::ReferenceCache,
        Self::Events,
    ];

    /// Physical table name
    pub const fn name(self) -> &'static str {
        match self {
            Self::OfflineRecords => "offline_records",
            Self::PendingOperations => "pending_operations",
            Self::SyncMetadata => "sync_metadata",
            Self::Conflicts => "conflicts",
            Self::ReferenceCache => "reference_cache",
            Self::Events => "events",
        }
    }

    /// Indexed columns, extracted from each record on write
    pub const fn indexes(self) -> &'static [&'static str] {
        match self {
            Self::OfflineRecords => &["entity_type", "status", "created_at"],
            Self::PendingOperations => &[
                "priority",
                "entity_type",
                "next_retry_at",
                "attempts",
                "created_at",
                "entity_id",
                "conflicted",
            ],
            Self::SyncMetadata => &[],
            Self::Conflicts => &["entity_type", "is_open", "created_at"],
            Self::ReferenceCache => &["entity_type", "expires_at"],
            Self::Events => &["timestamp", "kind"],
        }
    }
}

/// A value stored in the durable store
///
/// The full value is persisted as JSON; the columns named by
/// [`Table::indexes`] are duplicated next to it so range queries can use
/// SQL indexes.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: Table;

    /// Primary key within the table
    fn key(&self) -> String;

    /// Value of an indexed column, `None` stores `NULL`
    fn index_value(&self, index: &str) -> Option<IndexValue>;
}

/// Scalar stored in an index column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Integer(i64),
    Text(String),
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for IndexValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<IndexValue> for Value {
    fn from(value: IndexValue) -> Self {
        match value {
            IndexValue::Integer(v) => Self::Integer(v),
            IndexValue::Text(v) => Self::Text(v),
        }
    }
}

/// Selection over one index column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRange {
    Exact(IndexValue),
    Between {
        lower: Bound<IndexValue>,
        upper: Bound<IndexValue>,
    },
}

impl IndexRange {
    pub fn exact(value: impl Into<IndexValue>) -> Self {
        Self::Exact(value.into())
    }

    /// `column <= value`
    pub fn at_most(value: impl Into<IndexValue>) -> Self {
        Self::Between {
            lower: Bound::Unbounded,
            upper: Bound::Included(value.into()),
        }
    }

    /// `column >= value`
    pub fn at_least(value: impl Into<IndexValue>) -> Self {
        Self::Between {
            lower: Bound::Included(value.into()),
            upper: Bound::Unbounded,
        }
    }

    /// `column < value`
    pub fn below(value: impl Into<IndexValue>) -> Self {
        Self::Between {
            lower: Bound::Unbounded,
            upper: Bound::Excluded(value.into()),
        }
    }

    /// `lower <= column <= upper`
    pub fn between(lower: impl Into<IndexValue>, upper: impl Into<IndexValue>) -> Self {
        Self::Between {
            lower: Bound::Included(lower.into()),
            upper: Bound::Included(upper.into()),
        }
    }

    /// Render a SQL condition for `column` with positional parameters
    /// starting at `?1`.
    pub(crate) fn to_sql(&self, column: &str) -> (String, Vec<Value>) {
        match self {
            Self::Exact(value) => (format!("{column} = ?1"), vec![value.clone().into()]),
            Self::Between { lower, upper } => {
                let mut conditions = vec![format!("{column} IS NOT NULL")];
                let mut params = Vec::new();
                for (bound, inclusive, exclusive) in [(lower, ">=", ">"), (upper, "<=", "<")] {
                    let (op, value) = match bound {
                        Bound::Included(value) => (inclusive, value),
                        Bound::Excluded(value) => (exclusive, value),
                        Bound::Unbounded => continue,
                    };
                    params.push(value.clone().into());
                    conditions.push(format!("{column} {op} ?{}", params.len()));
                }
                (conditions.join(" AND "), params)
            }
        }
    }
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Post-filter, ordering and limit applied after rows are loaded
///
/// Rows come back in index order (or insertion order for full scans);
/// the ordering here is a stable sort on top of that.
pub struct Query<T> {
    filter: Option<Filter<T>>,
    order: Option<Comparator<T>>,
    limit: Option<usize>,
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self {
            filter: None,
            order: None,
            limit: None,
        }
    }
}

impl<T> Query<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(predicate));
        self
    }

    #[must_use]
    pub fn order_by(mut self, compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Some(Box::new(compare));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn apply(&self, mut rows: Vec<T>) -> Vec<T> {
        if let Some(predicate) = &self.filter {
            rows.retain(|row| predicate(row));
        }
        if let Some(compare) = &self.order {
            rows.sort_by(|a, b| compare(a, b));
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_table_has_a_distinct_name() {
        let mut names = Table::ALL.iter().map(|t| t.name()).collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Table::ALL.len());
    }

    #[test]
    fn exact_range_renders_single_parameter() {
        let (sql, params) = IndexRange::exact("price").to_sql("entity_type");
        assert_eq!(sql, "entity_type = ?1");
        assert!(matches!(params.as_slice(), [Value::Text(t)] if t == "price"));
    }

    #[test]
    fn between_range_skips_unbounded_sides() {
        let (sql, params) = IndexRange::below(10_i64).to_sql("next_retry_at");
        assert_eq!(sql, "next_retry_at IS NOT NULL AND next_retry_at < ?1");
        assert!(matches!(params.as_slice(), [Value::Integer(10)]));

        let (sql, params) = IndexRange::between(1_i64, 3_i64).to_sql("priority");
        assert_eq!(
            sql,
            "priority IS NOT NULL AND priority >= ?1 AND priority <= ?2"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn query_filters_orders_and_limits() {
        let query = Query::new()
            .filter(|n: &i32| n % 2 == 0)
            .order_by(|a, b| b.cmp(a))
            .limit(2);
        assert_eq!(query.apply(vec![1, 2, 3, 4, 6]), vec![6, 4]);
    }

    #[test]
    fn query_sort_is_stable() {
        let query = Query::new().order_by(|a: &(i32, char), b| a.0.cmp(&b.0));
        let rows = vec![(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd')];
        assert_eq!(
            query.apply(rows),
            vec![(1, 'b'), (1, 'd'), (2, 'a'), (2, 'c')]
        );
    }
}
