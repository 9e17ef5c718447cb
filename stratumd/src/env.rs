//! The running service: every component wired together with an explicit
//! start and shutdown.
use std::sync::Arc;

use anyhow::{Context, Result};
use stratum_conflict::{BatchChecker, BatchOutcome, KvPair, MutationType, RowLocks};
use stratum_ddl::DdlFilter;
use stratum_readresolve::{AsyncReadResolver, NoopRollForward, RollForwardStatus, SnapshotReader};
use stratum_storage::{MemoryPartition, SiTable};
use stratum_timestamp::{FileHighWaterMark, HighWaterMark, TimestampOracle};
use stratum_txn::{
    CancellationWatch, IsolationLevel, KeepAliveScheduler, SystemClock, Txn, TxnId, TxnStore, TxnSupplier, TxnView,
};
use tracing::{debug, info};

use crate::config::StratumConfig;

/// Name of the partition holding transaction records.
pub const TXN_TABLE: &str = "stratum_txn";

/// Oracle, transaction store, keep-alive and read resolution for one process.
pub struct Environment {
    config: StratumConfig,
    oracle: Arc<TimestampOracle>,
    store: Arc<TxnStore>,
    keep_alive: KeepAliveScheduler,
    resolver: AsyncReadResolver,
    row_locks: RowLocks,
}

impl Environment {
    /// Bring every component up from `config`, persisting the oracle's
    /// high-water mark at the configured path.
    pub async fn start(config: StratumConfig) -> Result<Self> {
        let hwm = Arc::new(FileHighWaterMark::new(&config.oracle.high_water_mark_path));
        Self::start_with(config, hwm).await
    }

    /// Like [`start`](Self::start) with a caller-supplied high-water mark store.
    pub async fn start_with(config: StratumConfig, hwm: Arc<dyn HighWaterMark>) -> Result<Self> {
        config.validate()?;
        let oracle = Arc::new(
            TimestampOracle::open(hwm, config.oracle.block_size)
                .await
                .context("open timestamp oracle")?,
        );
        let store = Arc::new(TxnStore::new(
            Arc::new(MemoryPartition::new(TXN_TABLE)),
            oracle.clone(),
            Arc::new(SystemClock),
            config.txn.clone(),
        ));
        let keep_alive = KeepAliveScheduler::new(store.clone());
        let resolver = AsyncReadResolver::new(&config.resolver, store.clone(), Arc::new(RollForwardStatus::default()));
        resolver.start();
        info!(reserved = oracle.reserved(), "environment started");
        Ok(Self { config, oracle, store, keep_alive, resolver, row_locks: RowLocks::default() })
    }

    /// Settings the environment was started with.
    pub fn config(&self) -> &StratumConfig {
        &self.config
    }

    /// Shared timestamp oracle.
    pub fn oracle(&self) -> &Arc<TimestampOracle> {
        &self.oracle
    }

    /// Transaction table.
    pub fn store(&self) -> &Arc<TxnStore> {
        &self.store
    }

    /// Heartbeat scheduler.
    pub fn keep_alive(&self) -> &KeepAliveScheduler {
        &self.keep_alive
    }

    /// Background read resolution.
    pub fn resolver(&self) -> &AsyncReadResolver {
        &self.resolver
    }

    /// Begin a writable transaction and keep it alive until it finishes.
    pub async fn begin(
        &self,
        parent: Option<TxnId>,
        isolation: Option<IsolationLevel>,
        additive: Option<bool>,
    ) -> stratum_txn::Result<(Txn, CancellationWatch)> {
        let txn = self.store.create(parent, isolation, additive).await?;
        let watch = self.keep_alive.schedule(txn.txn_id);
        Ok((txn, watch))
    }

    /// Commit and stop heartbeating. Returns the commit timestamp.
    pub async fn commit(&self, txn_id: TxnId) -> stratum_txn::Result<u64> {
        let result = self.store.commit(txn_id).await;
        self.keep_alive.finish(txn_id);
        result
    }

    /// Roll back and stop heartbeating.
    pub async fn rollback(&self, txn_id: TxnId) -> stratum_txn::Result<()> {
        self.keep_alive.finish(txn_id);
        self.store.rollback(txn_id).await
    }

    /// Current view of `txn_id` with its ancestry.
    pub async fn view(&self, txn_id: TxnId) -> stratum_txn::Result<Arc<TxnView>> {
        self.store.view(txn_id).await
    }

    /// Check `batch` for `txn_id` and, when every row passes, apply it to
    /// `table` and record the table as a destination. The batch's rows stay
    /// locked from the check until the writes land.
    pub async fn write(
        &self,
        txn_id: TxnId,
        table: &SiTable,
        checker: &BatchChecker,
        batch: &[KvPair],
    ) -> stratum_txn::Result<BatchOutcome> {
        let _rows = self.row_locks.lock(table.name(), batch.iter().map(|kv| kv.row_key.as_ref())).await;
        let txn = self.view(txn_id).await?;
        let outcome = checker.check(&txn, batch, table, self.store.as_ref()).await?;
        if !outcome.is_success() {
            return Ok(outcome);
        }
        for kv in batch {
            let value = match kv.mutation {
                MutationType::Delete => None,
                _ => Some(kv.value.clone()),
            };
            table.write(&kv.row_key, txn_id.0, value).await?;
        }
        self.store.record_destination(txn_id, table.name()).await?;
        debug!(%txn_id, table = table.name(), rows = batch.len(), "batch applied");
        Ok(outcome)
    }

    /// Snapshot reader over `table` that hands finished writers to the
    /// background resolver.
    pub fn reader(&self, table: SiTable) -> SnapshotReader {
        let region = Arc::new(table.clone());
        let resolver = self.resolver.resolver(region, Arc::new(NoopRollForward));
        SnapshotReader::new(table, self.store.clone()).with_resolver(resolver)
    }

    /// Visibility filter for the DDL transaction `txn_id`.
    pub async fn ddl_filter(&self, txn_id: TxnId) -> stratum_txn::Result<DdlFilter> {
        Ok(DdlFilter::new(self.view(txn_id).await?, &self.config.ddl))
    }

    /// Stop resolution and roll back every transaction still being kept alive.
    pub async fn shutdown(&self) {
        self.resolver.shutdown();
        self.keep_alive.shutdown().await;
        info!(reserved = self.oracle.reserved(), "environment stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use stratum_conflict::{ConflictResult, ConstraintContext};
    use stratum_txn::TxnState;

    fn hwm_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("stratumd-{}-{name}.hwm", std::process::id()))
    }

    fn config(name: &str) -> StratumConfig {
        let mut config = StratumConfig::default();
        config.oracle.block_size = 32;
        config.oracle.high_water_mark_path = hwm_path(name);
        config
    }

    #[tokio::test]
    async fn write_commit_read() {
        let env = Environment::start(config("rw")).await.unwrap();
        let table = SiTable::new(Arc::new(MemoryPartition::new("orders")));
        let checker = BatchChecker::unique(ConstraintContext::new("orders", "pk"));

        let (writer, _watch) = env.begin(None, None, None).await.unwrap();
        assert!(env.keep_alive().is_tracked(writer.txn_id));
        let batch = [KvPair::new(MutationType::Insert, &b"k1"[..], &b"v1"[..])];
        let outcome = env.write(writer.txn_id, &table, &checker, &batch).await.unwrap();
        assert!(outcome.is_success());

        let concurrent = env.view(env.begin(None, None, None).await.unwrap().0.txn_id).await.unwrap();
        env.commit(writer.txn_id).await.unwrap();
        assert!(!env.keep_alive().is_tracked(writer.txn_id));

        let later = env.view(env.begin(None, None, None).await.unwrap().0.txn_id).await.unwrap();
        let reader = env.reader(table.clone());
        assert_eq!(reader.read(&later, b"k1").await.unwrap(), Some(Bytes::from_static(b"v1")));
        assert_eq!(reader.read(&concurrent, b"k1").await.unwrap(), None);

        let record = env.store().get_transaction(writer.txn_id).await.unwrap().unwrap();
        assert!(record.destination_tables.contains("orders"));
        env.shutdown().await;
    }

    #[tokio::test]
    async fn conflicting_batch_is_not_applied() {
        let env = Environment::start(config("conflict")).await.unwrap();
        let table = SiTable::new(Arc::new(MemoryPartition::new("orders")));
        let checker = BatchChecker::default();

        let (first, _) = env.begin(None, None, None).await.unwrap();
        let (second, _) = env.begin(None, None, None).await.unwrap();
        let batch = [KvPair::new(MutationType::Update, &b"k"[..], &b"a"[..])];
        assert!(env.write(first.txn_id, &table, &checker, &batch).await.unwrap().is_success());

        let outcome = env.write(second.txn_id, &table, &checker, &batch).await.unwrap();
        assert_eq!(outcome.rows[0].result, ConflictResult::WriteConflict);
        assert_eq!(table.writers(b"k").await.unwrap(), vec![first.txn_id.0]);
        env.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_row_cannot_both_apply() {
        let env = Environment::start(config("race")).await.unwrap();
        let partition = Arc::new(MemoryPartition::new("orders"));
        partition.set_yielding(true);
        let table = SiTable::new(partition);
        let checker = BatchChecker::default();

        for round in 0..20u32 {
            let key = Bytes::from(format!("k{round}"));
            let (a, _) = env.begin(None, None, None).await.unwrap();
            let (b, _) = env.begin(None, None, None).await.unwrap();
            let batch = [KvPair::new(MutationType::Update, key.clone(), &b"v"[..])];
            let (first, second) = tokio::join!(
                env.write(a.txn_id, &table, &checker, &batch),
                env.write(b.txn_id, &table, &checker, &batch)
            );
            let (first, second) = (first.unwrap(), second.unwrap());
            assert_ne!(first.is_success(), second.is_success());
            let loser = if first.is_success() { &second } else { &first };
            assert_eq!(loser.rows[0].result, ConflictResult::WriteConflict);
            assert_eq!(table.writers(&key).await.unwrap().len(), 1);
        }
        env.shutdown().await;
    }

    #[tokio::test]
    async fn ddl_demarcation_through_environment() {
        let env = Environment::start(config("ddl")).await.unwrap();
        let (ddl, _) = env.begin(None, None, None).await.unwrap();
        let (before, _) = env.begin(None, None, None).await.unwrap();
        env.commit(ddl.txn_id).await.unwrap();
        let (after, _) = env.begin(None, None, None).await.unwrap();

        let filter = env.ddl_filter(ddl.txn_id).await.unwrap();
        assert!(!filter.is_visible_by(&*env.view(before.txn_id).await.unwrap()));
        assert!(filter.is_visible_by(&*env.view(after.txn_id).await.unwrap()));
        env.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_rolls_back_live_transactions() {
        let env = Environment::start(config("shutdown")).await.unwrap();
        let (txn, _) = env.begin(None, None, None).await.unwrap();
        env.shutdown().await;
        assert_eq!(env.view(txn.txn_id).await.unwrap().state(), TxnState::RolledBack);
    }

    #[tokio::test]
    async fn timestamps_survive_restart() {
        let cfg = config("restart");
        let env = Environment::start(cfg.clone()).await.unwrap();
        let last = env.oracle().next().await.unwrap();
        env.shutdown().await;
        drop(env);

        let env = Environment::start(cfg).await.unwrap();
        assert!(env.oracle().next().await.unwrap() > last);
        env.shutdown().await;
    }
}
