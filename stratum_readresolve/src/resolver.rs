//! Inline resolution of a single cell.
use stratum_metrics::RESOLUTIONS_APPLIED;
use stratum_storage::Stamp;
use stratum_txn::{TxnId, TxnState, TxnSupplier, TxnView};
use tracing::{debug, trace};

use crate::region::ResolvableRegion;
use crate::status::RollForwardStatus;

/// Final stamp for a writer, or `None` while it is still running.
pub fn stamp_for(writer: &TxnView) -> Option<Stamp> {
    match writer.effective_state() {
        TxnState::Committed => writer.effective_commit_timestamp().map(Stamp::Committed),
        TxnState::RolledBack => Some(Stamp::RolledBack),
        TxnState::Active => None,
    }
}

/// Resolves cells on the caller's task.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousReadResolver;

impl SynchronousReadResolver {
    /// Stamp the version of `row_key` written by `txn_id` if its writer has
    /// finished. Returns `true` when a stamp was written. Failures are
    /// swallowed; resolution is only an optimisation.
    pub async fn resolve(
        region: &dyn ResolvableRegion,
        row_key: &[u8],
        txn_id: TxnId,
        supplier: &dyn TxnSupplier,
        status: &RollForwardStatus,
    ) -> bool {
        let writer = match supplier.view(txn_id).await {
            Ok(view) => view,
            Err(e) => {
                debug!(region = region.name(), %txn_id, error = %e, "cannot resolve writer");
                return false;
            }
        };
        let Some(stamp) = stamp_for(&writer) else {
            status.record_active();
            trace!(region = region.name(), %txn_id, "writer still active");
            return false;
        };
        if let Err(e) = region.stamp(row_key, txn_id, stamp).await {
            debug!(region = region.name(), %txn_id, error = %e, "failed to write stamp");
            return false;
        }
        match stamp {
            Stamp::Committed(_) => status.record_committed(),
            Stamp::RolledBack => status.record_rolled_back(),
        }
        RESOLUTIONS_APPLIED.inc();
        true
    }
}
