//! In-process record store
//!
//! Keeps rows in memory behind a mutex. Every operation yields to the
//! runtime once before touching the data, so concurrent callers interleave
//! the way they would against a remote store. Outages can be simulated
//! with [`MemoryStore::set_available`].

use super::{select_rows, unavailable, Filter, OrderBy, RecordStore, Row, StoredRow, Table};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    next_seq: u64,
    rows: HashMap<Table, HashMap<String, (u64, Row)>>,
}

/// Record store held entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    /// Simulate the backend going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful writes, for asserting on write traffic
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &str) -> Result<()> {
        tokio::task::yield_now().await;
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable(op, "memory store is offline"))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| unavailable("lock", "memory store mutex poisoned"))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<StoredRow>> {
        self.enter("get").await?;
        let tables = self.lock()?;
        Ok(tables
            .rows
            .get(&table)
            .and_then(|t| t.get(key))
            .map(|(seq, data)| StoredRow {
                key: key.to_string(),
                seq: *seq,
                data: data.clone(),
            }))
    }

    async fn insert(&self, table: Table, key: &str, row: Row) -> Result<bool> {
        self.enter("insert").await?;
        let mut tables = self.lock()?;
        let seq = tables.next_seq + 1;
        let rows = tables.rows.entry(table).or_default();
        if rows.contains_key(key) {
            return Ok(false);
        }
        rows.insert(key.to_string(), (seq, row));
        tables.next_seq = seq;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
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
        self.enter("update").await?;
        let mut tables = self.lock()?;
        let Some((_, data)) = tables.rows.get_mut(&table).and_then(|t| t.get_mut(key)) else {
            return Ok(false);
        };
        if !expected.matches(data) {
            return Ok(false);
        }
        data.extend(fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<StoredRow>> {
        self.enter("query").await?;
        let tables = self.lock()?;
        let rows = tables
            .rows
            .get(&table)
            .map(|t| {
                t.iter()
                    .map(|(key, (seq, data))| StoredRow {
                        key: key.clone(),
                        seq: *seq,
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(select_rows(rows, filter, order_by))
    }
}
