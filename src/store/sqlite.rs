//! SQLite-backed record store
//!
//! Rows live in a single `records` table as JSON text, keyed by
//! `(tbl, key)`. `seq` is the SQLite rowid and therefore follows insertion
//! order. Every call opens its own connection on a blocking thread.

use super::{select_rows, unavailable, Filter, OrderBy, RecordStore, Row, StoredRow, Table};
use crate::error::{LampstandError, Result};
use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use std::time::Duration;

/// Record store persisted to a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path
    ///
    /// # Examples
    ///
    /// ```
    /// use lampstand::store::SqliteStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("lampstand.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| LampstandError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Path of the underlying database file
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    fn init(&self) -> Result<()> {
        let conn = open(&self.db_path).map_err(|e| LampstandError::Storage(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE (tbl, key)
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| LampstandError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = open(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| unavailable(op, e))?;

        outcome.map_err(|e| {
            tracing::warn!(op, error = %e, "SQLite store operation failed");
            unavailable(op, e)
        })
    }
}

fn open(path: &PathBuf) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn decode_row(seq: i64, key: String, data: &str) -> rusqlite::Result<StoredRow> {
    let data: Row = serde_json::from_str(data).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(StoredRow {
        key,
        seq: seq as u64,
        data,
    })
}

fn encode_row(row: &Row) -> rusqlite::Result<String> {
    serde_json::to_string(row).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<StoredRow>> {
        let key = key.to_string();
        self.run("get", move |conn| {
            conn.query_row(
                "SELECT seq, key, data FROM records WHERE tbl = ? AND key = ?",
                params![table.as_str(), key],
                |row| {
                    let data: String = row.get(2)?;
                    decode_row(row.get(0)?, row.get(1)?, &data)
                },
            )
            .optional()
        })
        .await
    }

    async fn insert(&self, table: Table, key: &str, row: Row) -> Result<bool> {
        let key = key.to_string();
        self.run("insert", move |conn| {
            let data = encode_row(&row)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO records (tbl, key, data) VALUES (?, ?, ?)",
                params![table.as_str(), key, data],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn update(&self, table: Table, key: &str, fields: Row) -> Result<bool> {
        self.update_if(table, key, &Filter::new(), fields).await
    }

    async fn update_if(
        &self,
        table: Table,
        key: &str,
        expected: &Filter,
        fields: Row,
    ) -> Result<bool> {
        let key = key.to_string();
        let expected = expected.clone();
        self.run("update", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT data FROM records WHERE tbl = ? AND key = ?",
                    params![table.as_str(), key],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current else {
                return Ok(false);
            };
            let mut data = decode_row(0, key.clone(), &current)?.data;
            if !expected.matches(&data) {
                return Ok(false);
            }

            data.extend(fields);
            tx.execute(
                "UPDATE records SET data = ? WHERE tbl = ? AND key = ?",
                params![encode_row(&data)?, table.as_str(), key],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<StoredRow>> {
        let rows = self
            .run("query", move |conn| {
                let mut stmt =
                    conn.prepare("SELECT seq, key, data FROM records WHERE tbl = ? ORDER BY seq")?;
                let rows = stmt
                    .query_map(params![table.as_str()], |row| {
                        let data: String = row.get(2)?;
                        decode_row(row.get(0)?, row.get(1)?, &data)
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        tracing::debug!(table = %table, rows = rows.len(), "SQLite query");
        Ok(select_rows(rows, filter, order_by))
    }
}
