//! Partition abstraction and an in-memory implementation.
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The partition is not currently serving requests (moved, closing, offline).
    #[error("partition {0} is not serving requests")]
    Unavailable(String),
    /// Stored bytes could not be interpreted.
    #[error("corrupt data: {0}")]
    Corrupt(String),
    /// IO or other underlying error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// One row returned by a scan: the row key and its columns in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Row key.
    pub key: Bytes,
    /// `(column, value)` pairs.
    pub columns: Vec<(Bytes, Bytes)>,
}

/// Byte-oriented access to one partition (region) of a table.
///
/// Single-cell writes must be atomic; nothing else is assumed.
#[async_trait::async_trait]
pub trait Partition: Send + Sync {
    /// Human-readable partition name, used in logs.
    fn name(&self) -> &str;

    /// Read one cell.
    async fn get(&self, row: &[u8], column: &[u8]) -> Result<Option<Bytes>>;

    /// Read every column of a row. Empty when the row does not exist.
    async fn get_row(&self, row: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Write one cell, replacing any previous value.
    async fn put(&self, row: &[u8], column: &[u8], value: Bytes) -> Result<()>;

    /// Remove one cell. Removing a missing cell is not an error.
    async fn delete(&self, row: &[u8], column: &[u8]) -> Result<()>;

    /// All rows whose key starts with `prefix`, in key order.
    async fn scan(&self, prefix: &[u8]) -> Result<Vec<Row>>;
}

/// In-memory partition for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryPartition {
    name: String,
    rows: RwLock<BTreeMap<Bytes, BTreeMap<Bytes, Bytes>>>,
    unavailable: AtomicBool,
    yielding: AtomicBool,
    puts: AtomicU64,
}

impl MemoryPartition {
    /// Create an empty partition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Make every subsequent operation fail with [`StorageError::Unavailable`] (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Yield to the scheduler before every operation, the way a remote
    /// partition would, so concurrent callers interleave between calls.
    pub fn set_yielding(&self, yielding: bool) {
        self.yielding.store(yielding, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    async fn check(&self) -> Result<()> {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Partition for MemoryPartition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, row: &[u8], column: &[u8]) -> Result<Option<Bytes>> {
        self.check().await?;
        Ok(self.rows.read().get(row).and_then(|cols| cols.get(column).cloned()))
    }

    async fn get_row(&self, row: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.check().await?;
        Ok(self
            .rows
            .read()
            .get(row)
            .map(|cols| cols.iter().map(|(c, v)| (c.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn put(&self, row: &[u8], column: &[u8], value: Bytes) -> Result<()> {
        self.check().await?;
        self.rows
            .write()
            .entry(Bytes::copy_from_slice(row))
            .or_default()
            .insert(Bytes::copy_from_slice(column), value);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, row: &[u8], column: &[u8]) -> Result<()> {
        self.check().await?;
        let mut rows = self.rows.write();
        if let Some(cols) = rows.get_mut(row) {
            cols.remove(column);
            if cols.is_empty() {
                rows.remove(row);
            }
        }
        Ok(())
    }

    async fn scan(&self, prefix: &[u8]) -> Result<Vec<Row>> {
        self.check().await?;
        let rows = self.rows.read();
        let start = Bound::Included(Bytes::copy_from_slice(prefix));
        Ok(rows
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, cols)| Row {
                key: key.clone(),
                columns: cols.iter().map(|(c, v)| (c.clone(), v.clone())).collect(),
            })
            .collect())
    }
}
