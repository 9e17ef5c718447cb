//! Read resolution: once a reader learns the final outcome of a cell's
//! writer, the outcome is stamped next to the cell so later readers skip the
//! transaction lookup.
#![deny(missing_docs)]

pub mod compaction;
pub mod queue;
pub mod reader;
pub mod region;
pub mod resolver;
pub mod status;

pub use compaction::{CompactionAction, CompactionClassifier, CompactionSummary};
pub use queue::{AsyncReadResolver, PartitionReadResolver, ResolverConfig};
pub use reader::SnapshotReader;
pub use region::{NoopRollForward, ResolvableRegion, RollForward};
pub use resolver::{stamp_for, SynchronousReadResolver};
pub use status::{RollForwardStatus, StatusSnapshot};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use stratum_storage::{MemoryPartition, SiTable};
    use stratum_timestamp::{MemoryHighWaterMark, TimestampOracle};
    use stratum_txn::{ManualClock, TxnConfig, TxnStore};

    pub(crate) async fn store() -> (Arc<TxnStore>, Arc<ManualClock>) {
        let oracle = TimestampOracle::open(Arc::new(MemoryHighWaterMark::default()), 64).await.unwrap();
        let clock = Arc::new(ManualClock::new(5_000_000));
        let store = TxnStore::new(
            Arc::new(MemoryPartition::new("txn")),
            Arc::new(oracle),
            clock.clone(),
            TxnConfig::default(),
        );
        (Arc::new(store), clock)
    }

    pub(crate) fn table(name: &str) -> (SiTable, Arc<MemoryPartition>) {
        let partition = Arc::new(MemoryPartition::new(name));
        (SiTable::new(partition.clone()), partition)
    }
}
