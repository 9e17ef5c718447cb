//! Snapshot reads over versioned cells.
use std::sync::Arc;

use bytes::Bytes;
use stratum_storage::{SiTable, Stamp};
use stratum_txn::{IsolationLevel, Result, TxnId, TxnSupplier, TxnView};
use tracing::trace;

use crate::queue::PartitionReadResolver;
use crate::resolver::stamp_for;

/// Reads the newest version of a row visible to a transaction.
///
/// Stamped versions are judged from the stamp alone. Unstamped versions cost
/// a transaction lookup; if that lookup shows a finished writer the cell is
/// queued for resolution.
pub struct SnapshotReader {
    table: SiTable,
    supplier: Arc<dyn TxnSupplier>,
    resolver: Option<PartitionReadResolver>,
}

impl SnapshotReader {
    /// Reader without background resolution.
    pub fn new(table: SiTable, supplier: Arc<dyn TxnSupplier>) -> Self {
        Self { table, supplier, resolver: None }
    }

    /// Queue finished-but-unstamped versions through `resolver`.
    pub fn with_resolver(mut self, resolver: PartitionReadResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Value of `row_key` as seen by `reader`; `None` if absent or deleted.
    pub async fn read(&self, reader: &TxnView, row_key: &[u8]) -> Result<Option<Bytes>> {
        for version in self.table.versions(row_key).await? {
            let writer = TxnId(version.txn_id);
            let visible = match version.stamp {
                Some(Stamp::RolledBack) => false,
                Some(Stamp::Committed(commit_ts)) => {
                    writer == reader.txn_id() || reader.descends_from(writer) || stamped_visible(reader, commit_ts)
                }
                None => {
                    let view = self.supplier.view(writer).await?;
                    if let (Some(resolver), Some(_)) = (&self.resolver, stamp_for(&view)) {
                        resolver.resolve(row_key, writer);
                    }
                    reader.can_see(&view)
                }
            };
            if visible {
                trace!(row = ?row_key, %writer, "visible version");
                return Ok(version.value);
            }
        }
        Ok(None)
    }
}

fn stamped_visible(reader: &TxnView, commit_ts: u64) -> bool {
    match reader.isolation_level() {
        IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => true,
        IsolationLevel::SnapshotIsolation => commit_ts <= reader.begin_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{AsyncReadResolver, ResolverConfig};
    use crate::region::NoopRollForward;
    use crate::status::RollForwardStatus;
    use crate::testing::{store, table};

    #[tokio::test]
    async fn snapshot_sees_only_earlier_commits() {
        let (txns, _) = store().await;
        let (t, _) = table("users");
        let reader = SnapshotReader::new(t.clone(), txns.clone());

        let w1 = txns.create(None, None, None).await.unwrap();
        t.write(b"k", w1.txn_id.0, Some(Bytes::from_static(b"old"))).await.unwrap();
        txns.commit(w1.txn_id).await.unwrap();

        let snapshot = txns.create(None, None, None).await.unwrap();
        let w2 = txns.create(None, None, None).await.unwrap();
        t.write(b"k", w2.txn_id.0, Some(Bytes::from_static(b"new"))).await.unwrap();
        txns.commit(w2.txn_id).await.unwrap();

        let snap_view = txns.view(snapshot.txn_id).await.unwrap();
        assert_eq!(reader.read(&snap_view, b"k").await.unwrap().as_deref(), Some(&b"old"[..]));

        let later = txns.view(txns.create(None, None, None).await.unwrap().txn_id).await.unwrap();
        assert_eq!(reader.read(&later, b"k").await.unwrap().as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn own_writes_and_tombstones() {
        let (txns, _) = store().await;
        let (t, _) = table("users");
        let reader = SnapshotReader::new(t.clone(), txns.clone());

        let w = txns.create(None, None, None).await.unwrap();
        t.write(b"k", w.txn_id.0, Some(Bytes::from_static(b"v"))).await.unwrap();
        let mine = txns.view(w.txn_id).await.unwrap();
        assert!(reader.read(&mine, b"k").await.unwrap().is_some());

        let other = txns.view(txns.create(None, None, None).await.unwrap().txn_id).await.unwrap();
        assert!(reader.read(&other, b"k").await.unwrap().is_none());

        txns.commit(w.txn_id).await.unwrap();
        let d = txns.create(None, None, None).await.unwrap();
        t.write(b"k", d.txn_id.0, None).await.unwrap();
        txns.commit(d.txn_id).await.unwrap();
        let after = txns.view(txns.create(None, None, None).await.unwrap().txn_id).await.unwrap();
        assert!(reader.read(&after, b"k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finished_writers_are_queued_for_resolution() {
        let (txns, _) = store().await;
        let (t, _) = table("users");
        let status = Arc::new(RollForwardStatus::default());
        let resolver = AsyncReadResolver::new(&ResolverConfig { threads: 1, queue_size: 4 }, txns.clone(), status.clone());
        let handle = resolver.resolver(Arc::new(t.clone()), Arc::new(NoopRollForward));
        let reader = SnapshotReader::new(t.clone(), txns.clone()).with_resolver(handle);

        let w = txns.create(None, None, None).await.unwrap();
        t.write(b"k", w.txn_id.0, Some(Bytes::from_static(b"v"))).await.unwrap();
        txns.rollback(w.txn_id).await.unwrap();

        let r = txns.view(txns.create(None, None, None).await.unwrap().txn_id).await.unwrap();
        assert!(reader.read(&r, b"k").await.unwrap().is_none());
        // Not started, so the single event sits in the queue.
        assert_eq!(status.snapshot().dropped, 0);
        for _ in 0..4 {
            reader.read(&r, b"k").await.unwrap();
        }
        assert_eq!(status.snapshot().dropped, 1);
    }
}
