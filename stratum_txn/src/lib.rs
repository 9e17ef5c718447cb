//! Stratum transaction layer: lifecycle records, their slot encoding,
//! ancestry-aware views, liveness and lazy timeout detection.
#![deny(missing_docs)]

pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod store;
pub mod supplier;
pub mod txn;
pub mod view;

pub use cache::ExpiringCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TxnConfig;
pub use error::{Result, TxnError};
pub use keepalive::{CancelSignal, CancellationWatch, KeepAliveScheduler};
pub use store::TxnStore;
pub use supplier::{TxnSupplier, MAX_ANCESTOR_DEPTH};
pub use txn::{IsolationLevel, Txn, TxnId, TxnState};
pub use view::{ConflictType, TxnView};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use stratum_storage::MemoryPartition;
    use stratum_timestamp::{MemoryHighWaterMark, TimestampOracle};

    use crate::{ManualClock, TxnConfig, TxnStore};

    pub(crate) struct Harness {
        pub store: Arc<TxnStore>,
        pub partition: Arc<MemoryPartition>,
        pub clock: Arc<ManualClock>,
    }

    pub(crate) async fn harness(config: TxnConfig) -> Harness {
        let oracle = TimestampOracle::open(Arc::new(MemoryHighWaterMark::default()), 128).await.unwrap();
        let partition = Arc::new(MemoryPartition::new("txn"));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(TxnStore::new(partition.clone(), Arc::new(oracle), clock.clone(), config));
        Harness { store, partition, clock }
    }
}
