//! Decides what compaction does with each cell version.
use std::sync::Arc;

use stratum_storage::{SiTable, Stamp};
use stratum_txn::{Result, TxnId, TxnSupplier};
use tracing::debug;

use crate::resolver::stamp_for;

/// What to do with one cell version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionAction {
    /// Leave it as is.
    Keep,
    /// Write the writer's final stamp next to it.
    Rewrite(Stamp),
    /// Drop it; its writer rolled back.
    Purge,
}

/// Per-row tally from [`CompactionClassifier::compact_row`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionSummary {
    /// Versions left untouched.
    pub kept: usize,
    /// Versions that received a stamp.
    pub rewritten: usize,
    /// Versions removed.
    pub purged: usize,
}

/// Classifies versions by their writer's outcome.
pub struct CompactionClassifier {
    supplier: Arc<dyn TxnSupplier>,
}

impl CompactionClassifier {
    /// Look writers up through `supplier`.
    pub fn new(supplier: Arc<dyn TxnSupplier>) -> Self {
        Self { supplier }
    }

    /// Classify the version written by `txn_id` carrying `stamp`.
    pub async fn classify(&self, txn_id: TxnId, stamp: Option<Stamp>) -> Result<CompactionAction> {
        match stamp {
            Some(Stamp::RolledBack) => Ok(CompactionAction::Purge),
            Some(Stamp::Committed(_)) => Ok(CompactionAction::Keep),
            None => {
                let view = self.supplier.view(txn_id).await?;
                Ok(match stamp_for(&view) {
                    Some(Stamp::RolledBack) => CompactionAction::Purge,
                    Some(committed) => CompactionAction::Rewrite(committed),
                    None => CompactionAction::Keep,
                })
            }
        }
    }

    /// Apply [`classify`](Self::classify) to every version of `row_key`.
    pub async fn compact_row(&self, table: &SiTable, row_key: &[u8]) -> Result<CompactionSummary> {
        let mut summary = CompactionSummary::default();
        for version in table.versions(row_key).await? {
            match self.classify(TxnId(version.txn_id), version.stamp).await? {
                CompactionAction::Keep => summary.kept += 1,
                CompactionAction::Rewrite(stamp) => {
                    table.stamp(row_key, version.txn_id, stamp).await?;
                    summary.rewritten += 1;
                }
                CompactionAction::Purge => {
                    table.purge(row_key, version.txn_id).await?;
                    summary.purged += 1;
                }
            }
        }
        debug!(table = table.name(), ?summary, "row compacted");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{store, table};
    use bytes::Bytes;

    #[tokio::test]
    async fn classification_follows_writer_outcome() {
        let (txns, _) = store().await;
        let classifier = CompactionClassifier::new(txns.clone());
        let committed = txns.create(None, None, None).await.unwrap();
        let commit_ts = txns.commit(committed.txn_id).await.unwrap();
        let aborted = txns.create(None, None, None).await.unwrap();
        txns.rollback(aborted.txn_id).await.unwrap();
        let running = txns.create(None, None, None).await.unwrap();

        assert_eq!(
            classifier.classify(committed.txn_id, None).await.unwrap(),
            CompactionAction::Rewrite(Stamp::Committed(commit_ts))
        );
        assert_eq!(classifier.classify(aborted.txn_id, None).await.unwrap(), CompactionAction::Purge);
        assert_eq!(classifier.classify(running.txn_id, None).await.unwrap(), CompactionAction::Keep);
        assert_eq!(
            classifier.classify(TxnId(1), Some(Stamp::Committed(2))).await.unwrap(),
            CompactionAction::Keep
        );
    }

    #[tokio::test]
    async fn compact_row_applies_actions() {
        let (txns, _) = store().await;
        let (t, _) = table("users");
        let classifier = CompactionClassifier::new(txns.clone());
        let a = txns.create(None, None, None).await.unwrap();
        let b = txns.create(None, None, None).await.unwrap();
        let c = txns.create(None, None, None).await.unwrap();
        for w in [&a, &b, &c] {
            t.write(b"k", w.txn_id.0, Some(Bytes::from_static(b"v"))).await.unwrap();
        }
        txns.commit(a.txn_id).await.unwrap();
        txns.rollback(b.txn_id).await.unwrap();

        let summary = classifier.compact_row(&t, b"k").await.unwrap();
        assert_eq!(summary, CompactionSummary { kept: 1, rewritten: 1, purged: 1 });
        let writers = t.writers(b"k").await.unwrap();
        assert_eq!(writers, vec![c.txn_id.0, a.txn_id.0]);
    }
}
