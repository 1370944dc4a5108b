//! Durable record store abstraction
//!
//! The quota ledger and the session store never talk to a database
//! directly. They go through [`RecordStore`], a small table/key/JSON-row
//! interface with equality filters and single-column ordering. Rows cross
//! this boundary as loosely typed JSON objects; each domain module maps
//! them onto its own strongly typed record and rejects malformed rows.

use crate::error::{LampstandError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A loosely typed row as stored by the backend
pub type Row = serde_json::Map<String, Value>;

/// Tables known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// One quota record per user, keyed by user id
    Quotas,
    /// Chat sessions, keyed by slug
    ChatSessions,
}

impl Table {
    /// Backend table name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quotas => "quotas",
            Self::ChatSessions => "chat_sessions",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row together with its key and creation sequence number
///
/// `seq` increases monotonically with insertion and is never rewritten by
/// updates, so it doubles as a stable creation-order key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Primary key within the table
    pub key: String,
    /// Insertion sequence number
    pub seq: u64,
    /// Row contents
    pub data: Row,
}

/// Conjunction of equality predicates over row fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// A filter that matches every row
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality predicate
    ///
    /// # Examples
    ///
    /// ```
    /// use lampstand::store::Filter;
    /// use serde_json::json;
    ///
    /// let filter = Filter::new().eq("user_id", "u1").eq("is_deleted", false);
    /// let mut row = serde_json::Map::new();
    /// row.insert("user_id".into(), json!("u1"));
    /// row.insert("is_deleted".into(), json!(false));
    /// assert!(filter.matches(&row));
    /// ```
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// Whether a row satisfies every predicate
    ///
    /// Missing fields never match, except against an explicit `null`.
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| row.get(field).unwrap_or(&Value::Null) == expected)
    }

    /// True when there are no predicates
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Single-column ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field to order by
    pub column: String,
    /// Descending instead of ascending
    pub descending: bool,
}

impl OrderBy {
    /// Ascending order on `column`
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending order on `column`
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Durable record store used by the quota ledger and session store
///
/// Every method reports an unreachable backend as
/// `LampstandError::StoreUnavailable`. Writes are last-write-wins except
/// [`RecordStore::update_if`], which only applies when the stored row still
/// matches the expected predicates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a row by key
    async fn get(&self, table: Table, key: &str) -> Result<Option<StoredRow>>;

    /// Insert a new row
    ///
    /// Returns `false` without writing when the key already exists.
    async fn insert(&self, table: Table, key: &str, row: Row) -> Result<bool>;

    /// Merge `fields` into an existing row
    ///
    /// Returns `false` when no row has that key.
    async fn update(&self, table: Table, key: &str, fields: Row) -> Result<bool>;

    /// Merge `fields` into an existing row only if it matches `expected`
    ///
    /// Returns `false` when the row is missing or no longer matches.
    async fn update_if(&self, table: Table, key: &str, expected: &Filter, fields: Row)
        -> Result<bool>;

    /// All rows matching `filter`, optionally ordered by one column
    ///
    /// Rows that compare equal on the order column keep insertion order.
    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<StoredRow>>;
}

/// Filter and sort rows already in insertion order
pub(crate) fn select_rows(
    mut rows: Vec<StoredRow>,
    filter: &Filter,
    order_by: Option<&OrderBy>,
) -> Vec<StoredRow> {
    rows.retain(|r| filter.matches(&r.data));
    rows.sort_by_key(|r| r.seq);

    if let Some(order) = order_by {
        let column = order.column.as_str();
        rows.sort_by(|a, b| {
            let ordering = compare_values(a.data.get(column), b.data.get(column));
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    rows
}

/// Total order over JSON scalars used for `OrderBy`
///
/// Missing values sort first, then booleans, numbers and strings.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Encode a timestamp so that lexical order equals chronological order
pub fn encode_time(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Read a required timestamp field from a row
pub fn decode_time(row: &Row, field: &str, table: Table) -> Result<DateTime<Utc>> {
    let raw = require_str(row, field, table)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(table, format!("field {} is not a timestamp: {}", field, e)))
}

/// Read a required string field from a row
pub fn require_str<'a>(row: &'a Row, field: &str, table: Table) -> Result<&'a str> {
    row.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(table, format!("missing string field {}", field)))
}

/// Read a boolean field, treating a missing field as `false`
pub fn optional_bool(row: &Row, field: &str, table: Table) -> Result<bool> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(invalid(table, format!("field {} is not a boolean", field))),
    }
}

fn invalid(table: Table, message: String) -> anyhow::Error {
    LampstandError::InvalidRecord {
        table: table.to_string(),
        message,
    }
    .into()
}

/// Wrap a backend failure as `StoreUnavailable`
pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
    LampstandError::StoreUnavailable(format!("{}: {}", context, err)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn stored(key: &str, seq: u64, data: Row) -> StoredRow {
        StoredRow {
            key: key.to_string(),
            seq,
            data,
        }
    }

    #[test]
    fn test_filter_matches_all_clauses() {
        let filter = Filter::new().eq("user_id", "u1").eq("pinned", true);
        assert!(filter.matches(&row(&[("user_id", json!("u1")), ("pinned", json!(true))])));
        assert!(!filter.matches(&row(&[("user_id", json!("u1")), ("pinned", json!(false))])));
        assert!(!filter.matches(&row(&[("user_id", json!("u1"))])));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().is_empty());
        assert!(Filter::new().matches(&Row::new()));
    }

    #[test]
    fn test_select_rows_orders_descending_with_stable_ties() {
        let rows = vec![
            stored("c", 3, row(&[("at", json!("2024-01-02"))])),
            stored("a", 1, row(&[("at", json!("2024-01-01"))])),
            stored("b", 2, row(&[("at", json!("2024-01-02"))])),
        ];

        let sorted = select_rows(rows, &Filter::new(), Some(&OrderBy::desc("at")));
        let keys: Vec<_> = sorted.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_select_rows_without_order_uses_insertion_order() {
        let rows = vec![
            stored("second", 2, Row::new()),
            stored("first", 1, Row::new()),
        ];
        let sorted = select_rows(rows, &Filter::new(), None);
        assert_eq!(sorted[0].key, "first");
        assert_eq!(sorted[1].key, "second");
    }

    #[test]
    fn test_compare_values_numbers_and_missing() {
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(compare_values(None, Some(&json!(0))), Ordering::Less);
    }

    #[test]
    fn test_encoded_times_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert_eq!(
            compare_values(Some(&encode_time(early)), Some(&encode_time(late))),
            Ordering::Less
        );
    }

    #[test]
    fn test_decode_time_roundtrip_and_errors() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let r = row(&[("window_start", encode_time(at)), ("bad", json!(5))]);
        assert_eq!(decode_time(&r, "window_start", Table::Quotas).unwrap(), at);

        let err = decode_time(&r, "bad", Table::Quotas).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LampstandError>(),
            Some(LampstandError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_optional_bool() {
        let r = row(&[("pinned", json!(true)), ("odd", json!("yes"))]);
        assert!(optional_bool(&r, "pinned", Table::ChatSessions).unwrap());
        assert!(!optional_bool(&r, "missing", Table::ChatSessions).unwrap());
        assert!(optional_bool(&r, "odd", Table::ChatSessions).is_err());
    }
}
