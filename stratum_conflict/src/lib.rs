//! Write-write conflict detection and same-batch uniqueness checks.
#![deny(missing_docs)]

pub mod batch;
pub mod constraint;
pub mod locks;
pub mod mutation;
pub mod write_write;

pub use batch::{BatchChecker, BatchOutcome, RowOutcome};
pub use constraint::{Constraint, ConstraintContext, UniqueConstraint};
pub use locks::{RowGuard, RowLocks};
pub use mutation::{ConflictResult, KvPair, MutationType};
pub use write_write::{detect_write_conflict, WriteHistory};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use stratum_storage::{MemoryPartition, SiTable};
    use stratum_timestamp::{MemoryHighWaterMark, TimestampOracle};
    use stratum_txn::{SystemClock, TxnConfig, TxnStore};

    pub(crate) async fn fixtures() -> (Arc<TxnStore>, SiTable) {
        let oracle = TimestampOracle::open(Arc::new(MemoryHighWaterMark::default()), 64).await.unwrap();
        let store = TxnStore::new(
            Arc::new(MemoryPartition::new("txn")),
            Arc::new(oracle),
            Arc::new(SystemClock),
            TxnConfig::default(),
        );
        (Arc::new(store), SiTable::new(Arc::new(MemoryPartition::new("orders"))))
    }
}
