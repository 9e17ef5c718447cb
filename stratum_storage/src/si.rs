//! Versioned cell layout used by snapshot isolation.
//!
//! Every write of a row by a transaction becomes its own storage row keyed by
//! `len(row_key) | row_key | txn_id`, so all versions of a logical row are
//! contiguous and newest-last. Two columns are used:
//!
//! * `d` – the payload, prefixed with a tag byte (`1` value, `0` tombstone)
//! * `t` – the writer's resolved outcome once known ([`Stamp`])
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::engine::{Partition, Result, StorageError};

const DATA_COLUMN: &[u8] = b"d";
const STAMP_COLUMN: &[u8] = b"t";

const TAG_TOMBSTONE: u8 = 0;
const TAG_VALUE: u8 = 1;

const STAMP_COMMITTED: u8 = 1;
const STAMP_ROLLED_BACK: u8 = 2;

/// Resolved outcome of a cell's writer, stored next to the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Writer committed; the value is its effective commit timestamp.
    Committed(u64),
    /// Writer rolled back; the cell is garbage.
    RolledBack,
}

impl Stamp {
    /// Serialize into the `t` column format.
    pub fn encode(&self) -> Bytes {
        match self {
            Stamp::Committed(ts) => {
                let mut buf = BytesMut::with_capacity(9);
                buf.put_u8(STAMP_COMMITTED);
                buf.put_u64(*ts);
                buf.freeze()
            }
            Stamp::RolledBack => Bytes::from_static(&[STAMP_ROLLED_BACK]),
        }
    }

    /// Parse the `t` column format.
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(StorageError::Corrupt("empty stamp".into()));
        }
        match raw.get_u8() {
            STAMP_COMMITTED if raw.len() == 8 => Ok(Stamp::Committed(raw.get_u64())),
            STAMP_ROLLED_BACK if raw.is_empty() => Ok(Stamp::RolledBack),
            tag => Err(StorageError::Corrupt(format!("bad stamp tag {tag} ({} trailing bytes)", raw.len()))),
        }
    }
}

/// One version of a logical row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellVersion {
    /// Id of the writing transaction.
    pub txn_id: u64,
    /// Payload, `None` for a delete.
    pub value: Option<Bytes>,
    /// Resolved outcome if it has been rolled forward.
    pub stamp: Option<Stamp>,
}

/// Snapshot-isolation view over a [`Partition`].
#[derive(Clone)]
pub struct SiTable {
    partition: Arc<dyn Partition>,
}

impl SiTable {
    /// Wrap a partition.
    pub fn new(partition: Arc<dyn Partition>) -> Self {
        Self { partition }
    }

    /// Name of the underlying partition.
    pub fn name(&self) -> &str {
        self.partition.name()
    }

    /// Record `txn_id`'s write of `row_key`; `None` writes a tombstone.
    pub async fn write(&self, row_key: &[u8], txn_id: u64, value: Option<Bytes>) -> Result<()> {
        let payload = match value {
            Some(v) => {
                let mut buf = BytesMut::with_capacity(v.len() + 1);
                buf.put_u8(TAG_VALUE);
                buf.put_slice(&v);
                buf.freeze()
            }
            None => Bytes::from_static(&[TAG_TOMBSTONE]),
        };
        self.partition.put(&version_key(row_key, txn_id), DATA_COLUMN, payload).await
    }

    /// Every version of `row_key`, newest writer first.
    pub async fn versions(&self, row_key: &[u8]) -> Result<Vec<CellVersion>> {
        let prefix = row_prefix(row_key);
        let rows = self.partition.scan(&prefix).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            // A longer row key can share our prefix; only exact-length keys belong to us.
            if row.key.len() != prefix.len() + 8 {
                continue;
            }
            let txn_id = (&row.key[prefix.len()..]).get_u64();
            let mut version = CellVersion { txn_id, value: None, stamp: None };
            let mut has_data = false;
            for (column, raw) in &row.columns {
                if column.as_ref() == DATA_COLUMN {
                    version.value = decode_payload(raw)?;
                    has_data = true;
                } else if column.as_ref() == STAMP_COLUMN {
                    version.stamp = Some(Stamp::decode(raw)?);
                }
            }
            if has_data {
                out.push(version);
            }
        }
        out.reverse();
        Ok(out)
    }

    /// Ids of every transaction that has written `row_key`, newest first.
    pub async fn writers(&self, row_key: &[u8]) -> Result<Vec<u64>> {
        Ok(self.versions(row_key).await?.into_iter().map(|v| v.txn_id).collect())
    }

    /// Roll a version forward. Rewriting the same stamp is a no-op in effect.
    /// A version that has been purged is left alone.
    pub async fn stamp(&self, row_key: &[u8], txn_id: u64, stamp: Stamp) -> Result<()> {
        let key = version_key(row_key, txn_id);
        if self.partition.get(&key, DATA_COLUMN).await?.is_none() {
            return Ok(());
        }
        self.partition.put(&key, STAMP_COLUMN, stamp.encode()).await?;
        // Purged between the check and the stamp.
        if self.partition.get(&key, DATA_COLUMN).await?.is_none() {
            self.partition.delete(&key, STAMP_COLUMN).await?;
        }
        Ok(())
    }

    /// Physically remove one version (compaction of rolled-back writes).
    pub async fn purge(&self, row_key: &[u8], txn_id: u64) -> Result<()> {
        let key = version_key(row_key, txn_id);
        self.partition.delete(&key, DATA_COLUMN).await?;
        self.partition.delete(&key, STAMP_COLUMN).await
    }
}

fn row_prefix(row_key: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + row_key.len() + 8);
    buf.put_u32(row_key.len() as u32);
    buf.put_slice(row_key);
    buf
}

fn version_key(row_key: &[u8], txn_id: u64) -> Bytes {
    let mut buf = row_prefix(row_key);
    buf.put_u64(txn_id);
    buf.freeze()
}

fn decode_payload(raw: &[u8]) -> Result<Option<Bytes>> {
    match raw.first() {
        Some(&TAG_VALUE) => Ok(Some(Bytes::copy_from_slice(&raw[1..]))),
        Some(&TAG_TOMBSTONE) => Ok(None),
        _ => Err(StorageError::Corrupt("bad payload tag".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryPartition;

    fn table() -> SiTable {
        SiTable::new(Arc::new(MemoryPartition::new("users")))
    }

    #[tokio::test]
    async fn versions_newest_first_with_stamps() {
        let t = table();
        t.write(b"k1", 10, Some(Bytes::from_static(b"a"))).await.unwrap();
        t.write(b"k1", 20, None).await.unwrap();
        t.write(b"k10", 30, Some(Bytes::from_static(b"other"))).await.unwrap();
        t.stamp(b"k1", 10, Stamp::Committed(15)).await.unwrap();

        let versions = t.versions(b"k1").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0], CellVersion { txn_id: 20, value: None, stamp: None });
        assert_eq!(versions[1].stamp, Some(Stamp::Committed(15)));
        assert_eq!(versions[1].value.as_deref(), Some(&b"a"[..]));
        assert_eq!(t.writers(b"k10").await.unwrap(), vec![30]);
    }

    #[tokio::test]
    async fn purge_removes_version() {
        let t = table();
        t.write(b"k", 1, Some(Bytes::from_static(b"x"))).await.unwrap();
        t.stamp(b"k", 1, Stamp::RolledBack).await.unwrap();
        t.purge(b"k", 1).await.unwrap();
        assert!(t.versions(b"k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stamping_a_purged_version_leaves_nothing_behind() {
        let partition = Arc::new(MemoryPartition::new("users"));
        let t = SiTable::new(partition.clone());
        t.write(b"k", 1, Some(Bytes::from_static(b"x"))).await.unwrap();
        t.purge(b"k", 1).await.unwrap();
        t.stamp(b"k", 1, Stamp::Committed(5)).await.unwrap();
        assert!(partition.get_row(&version_key(b"k", 1)).await.unwrap().is_empty());
        assert!(partition.scan(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn stamp_rejects_garbage() {
        assert!(Stamp::decode(&[]).is_err());
        assert!(Stamp::decode(&[STAMP_COMMITTED, 1]).is_err());
        assert_eq!(Stamp::decode(&Stamp::RolledBack.encode()).unwrap(), Stamp::RolledBack);
    }
}
