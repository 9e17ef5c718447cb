//! Regions that accept outcome stamps and the roll-forward callback.
use stratum_storage::{SiTable, Stamp, StorageError};
use stratum_txn::TxnId;

/// A region whose cells can be stamped with their writer's outcome.
#[async_trait::async_trait]
pub trait ResolvableRegion: Send + Sync {
    /// Region name for logs.
    fn name(&self) -> &str;

    /// Record `stamp` on the version of `row_key` written by `txn_id`.
    /// Writing the same stamp twice must be harmless.
    async fn stamp(&self, row_key: &[u8], txn_id: TxnId, stamp: Stamp) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
impl ResolvableRegion for SiTable {
    fn name(&self) -> &str {
        SiTable::name(self)
    }

    async fn stamp(&self, row_key: &[u8], txn_id: TxnId, stamp: Stamp) -> Result<(), StorageError> {
        SiTable::stamp(self, row_key, txn_id.0, stamp).await
    }
}

/// Told about every row the asynchronous resolver finished.
pub trait RollForward: Send + Sync {
    /// `row_key` written by `txn_id` now carries its final stamp.
    fn record_resolved(&self, row_key: &[u8], txn_id: TxnId);
}

/// Ignores resolutions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRollForward;

impl RollForward for NoopRollForward {
    fn record_resolved(&self, _row_key: &[u8], _txn_id: TxnId) {}
}
