//! Write-write conflict detection against a row's earlier writers.
use stratum_storage::{SiTable, Stamp, StorageError};
use stratum_txn::{ConflictType, Result, TxnId, TxnSupplier, TxnView};
use tracing::trace;

use crate::mutation::ConflictResult;

/// Earlier writers of a row, as recorded by the storage layer.
#[async_trait::async_trait]
pub trait WriteHistory: Send + Sync {
    /// Every writer of `row_key` with its stamp if resolved, newest first.
    async fn writers(&self, row_key: &[u8]) -> std::result::Result<Vec<(TxnId, Option<Stamp>)>, StorageError>;
}

#[async_trait::async_trait]
impl WriteHistory for SiTable {
    async fn writers(&self, row_key: &[u8]) -> std::result::Result<Vec<(TxnId, Option<Stamp>)>, StorageError> {
        Ok(self.versions(row_key).await?.into_iter().map(|v| (TxnId(v.txn_id), v.stamp)).collect())
    }
}

/// Compare `txn` with every earlier writer of `row_key`.
///
/// Returns the first genuine conflict found, otherwise an additive conflict
/// if one was seen, otherwise success. The conflicting writer is returned
/// alongside.
pub async fn detect_write_conflict(
    txn: &TxnView,
    row_key: &[u8],
    history: &dyn WriteHistory,
    supplier: &dyn TxnSupplier,
) -> Result<(ConflictResult, Option<TxnId>)> {
    let mut additive = None;
    for (writer, stamp) in history.writers(row_key).await? {
        if writer == txn.txn_id() {
            continue;
        }
        match stamp {
            Some(Stamp::RolledBack) => continue,
            Some(Stamp::Committed(ts)) if ts <= txn.begin_timestamp() => continue,
            _ => {}
        }
        let other = supplier.view(writer).await?;
        match txn.conflicts_with(&other) {
            ConflictType::None => {}
            ConflictType::Additive => {
                additive.get_or_insert(writer);
            }
            ConflictType::Conflict => {
                trace!(txn = %txn.txn_id(), %writer, "write-write conflict");
                return Ok((ConflictResult::WriteConflict, Some(writer)));
            }
        }
    }
    Ok(match additive {
        Some(writer) => (ConflictResult::AdditiveWriteConflict, Some(writer)),
        None => (ConflictResult::Success, None),
    })
}
