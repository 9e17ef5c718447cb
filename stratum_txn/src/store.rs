//! Durable transaction table.
use std::sync::Arc;

use stratum_metrics::{TXNS_COMMITTED, TXNS_CREATED, TXNS_ROLLED_BACK, TXN_CACHE_HITS, TXN_TIMEOUTS};
use stratum_storage::Partition;
use stratum_timestamp::TimestampSource;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::cache::ExpiringCache;
use crate::clock::Clock;
use crate::codec;
use crate::config::TxnConfig;
use crate::error::{Result, TxnError};
use crate::supplier::TxnSupplier;
use crate::txn::{IsolationLevel, Txn, TxnId, TxnState};
use crate::view::TxnView;

/// Striped locks serializing state transitions of one transaction.
const TRANSITION_STRIPES: usize = 64;

/// Creates, reads and finalizes transaction records in a dedicated partition.
///
/// Every mutation touches exactly one slot per write. Timeouts are derived
/// lazily on read; only mutating paths write a timed-out state back.
/// Mutations of one record run under its stripe lock, so a terminal state
/// once written is never overwritten.
pub struct TxnStore {
    partition: Arc<dyn Partition>,
    timestamps: Arc<dyn TimestampSource>,
    clock: Arc<dyn Clock>,
    config: TxnConfig,
    completed: ExpiringCache<TxnId, Arc<Txn>>,
    transitions: Vec<Mutex<()>>,
}

impl TxnStore {
    /// Build a store over `partition`.
    pub fn new(
        partition: Arc<dyn Partition>,
        timestamps: Arc<dyn TimestampSource>,
        clock: Arc<dyn Clock>,
        config: TxnConfig,
    ) -> Self {
        let completed = ExpiringCache::new(config.completed_cache_size, config.completed_cache_ttl());
        let transitions = (0..TRANSITION_STRIPES).map(|_| Mutex::new(())).collect();
        Self { partition, timestamps, clock, config, completed, transitions }
    }

    /// Active settings.
    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Begin a writable transaction.
    pub async fn create(
        &self,
        parent: Option<TxnId>,
        isolation: Option<IsolationLevel>,
        additive: Option<bool>,
    ) -> Result<Txn> {
        self.check_parent(parent).await?;
        let ts = self.timestamps.next_timestamp().await?;
        let mut txn = Txn::new(TxnId(ts), ts, self.clock.now_millis());
        txn.parent_txn_id = parent;
        txn.isolation_level = isolation;
        txn.additive = additive;

        let key = codec::row_key(txn.txn_id);
        self.partition.put(&key, codec::CORE, codec::encode_core(&txn)).await?;
        self.partition.put(&key, codec::KEEP_ALIVE, codec::encode_u64(txn.keep_alive_timestamp)).await?;
        self.partition.put(&key, codec::STATE, codec::encode_state(TxnState::Active)).await?;
        TXNS_CREATED.inc();
        debug!(txn_id = %txn.txn_id, parent = ?parent, "transaction created");
        Ok(txn)
    }

    /// Begin a read-only transaction. Nothing is written.
    pub async fn begin_read_only(&self, parent: Option<TxnId>, isolation: Option<IsolationLevel>) -> Result<TxnView> {
        let parent_view = match parent {
            Some(p) => Some(self.check_parent(Some(p)).await?.ok_or(TxnError::NotFound(p))?),
            None => None,
        };
        let ts = self.timestamps.next_timestamp().await?;
        let mut txn = Txn::new(TxnId(ts), ts, self.clock.now_millis());
        txn.parent_txn_id = parent;
        txn.isolation_level = isolation;
        trace!(txn_id = %txn.txn_id, "read-only transaction");
        Ok(TxnView::read_only(txn, parent_view))
    }

    /// Commit, returning the commit timestamp. Committing twice returns the
    /// same timestamp.
    pub async fn commit(&self, txn_id: TxnId) -> Result<u64> {
        let _guard = self.transition_lock(txn_id).lock().await;
        let txn = self.load(txn_id).await?.ok_or(TxnError::NotFound(txn_id))?;
        match txn.state {
            TxnState::Committed => {
                return txn
                    .commit_timestamp
                    .or(txn.global_commit_timestamp)
                    .ok_or_else(|| TxnError::Format(format!("committed transaction {txn_id} has no commit timestamp")));
            }
            TxnState::RolledBack => return Err(TxnError::CannotCommit { txn: txn_id, state: TxnState::RolledBack }),
            TxnState::Active => {}
        }
        if self.is_timed_out(txn.keep_alive_timestamp) {
            self.write_back_timeout(txn_id).await;
            return Err(TxnError::TransactionTimeout(txn_id));
        }
        if let Some(parent) = txn.parent_txn_id {
            let state = self.view(parent).await?.effective_state();
            if state == TxnState::RolledBack {
                return Err(TxnError::CannotCommit { txn: txn_id, state });
            }
        }

        let commit_ts = self.timestamps.next_timestamp().await?;
        let key = codec::row_key(txn_id);
        self.partition.put(&key, codec::COMMIT, codec::encode_u64(commit_ts)).await?;
        self.partition.put(&key, codec::STATE, codec::encode_state(TxnState::Committed)).await?;
        TXNS_COMMITTED.inc();
        self.completed.remove(&txn_id);
        debug!(%txn_id, commit_ts, "transaction committed");
        Ok(commit_ts)
    }

    /// Roll back. Rolling back twice is a no-op; rolling back a committed
    /// transaction is an error.
    pub async fn rollback(&self, txn_id: TxnId) -> Result<()> {
        let _guard = self.transition_lock(txn_id).lock().await;
        let txn = self.load(txn_id).await?.ok_or(TxnError::NotFound(txn_id))?;
        match txn.state {
            TxnState::RolledBack => Ok(()),
            TxnState::Committed => Err(TxnError::CannotCommit { txn: txn_id, state: TxnState::Committed }),
            TxnState::Active => {
                self.write_state(txn_id, TxnState::RolledBack).await?;
                TXNS_ROLLED_BACK.inc();
                debug!(%txn_id, "transaction rolled back");
                Ok(())
            }
        }
    }

    /// `Active` becomes `RolledBack` once the keep-alive is older than the
    /// timeout plus fudge.
    pub fn adjust_state_for_timeout(&self, state: TxnState, keep_alive: u64) -> TxnState {
        if state == TxnState::Active && self.is_timed_out(keep_alive) {
            TxnState::RolledBack
        } else {
            state
        }
    }

    /// Refresh the keep-alive slot. `false` once the transaction is no longer active.
    pub async fn keep_alive(&self, txn_id: TxnId) -> Result<bool> {
        let _guard = self.transition_lock(txn_id).lock().await;
        let txn = self.load(txn_id).await?.ok_or(TxnError::NotFound(txn_id))?;
        if txn.state != TxnState::Active {
            return Ok(false);
        }
        if self.is_timed_out(txn.keep_alive_timestamp) {
            self.write_back_timeout(txn_id).await;
            return Ok(false);
        }
        let now = self.clock.now_millis().max(txn.keep_alive_timestamp);
        self.partition.put(&codec::row_key(txn_id), codec::KEEP_ALIVE, codec::encode_u64(now)).await?;
        trace!(%txn_id, now, "keep-alive");
        Ok(true)
    }

    /// Remember that `txn_id` wrote to `table`.
    pub async fn record_destination(&self, txn_id: TxnId, table: &str) -> Result<()> {
        let _guard = self.transition_lock(txn_id).lock().await;
        let mut txn = self.load(txn_id).await?.ok_or(TxnError::NotFound(txn_id))?;
        let state = self.adjust_state_for_timeout(txn.state, txn.keep_alive_timestamp);
        if state != TxnState::Active {
            return Err(TxnError::CannotCommit { txn: txn_id, state });
        }
        if !txn.destination_tables.insert(table.to_string()) {
            return Ok(());
        }
        let encoded = codec::encode_destinations(&txn.destination_tables)?;
        self.partition.put(&codec::row_key(txn_id), codec::DESTINATIONS, encoded).await?;
        Ok(())
    }

    /// Stamp the commit timestamp of a coordinated commit. This alone makes
    /// the transaction committed.
    pub async fn record_global_commit(&self, txn_id: TxnId, global_commit_ts: u64) -> Result<()> {
        let _guard = self.transition_lock(txn_id).lock().await;
        let txn = self.load(txn_id).await?.ok_or(TxnError::NotFound(txn_id))?;
        if txn.state == TxnState::RolledBack {
            return Err(TxnError::CannotCommit { txn: txn_id, state: TxnState::RolledBack });
        }
        self.partition
            .put(&codec::row_key(txn_id), codec::GLOBAL_COMMIT, codec::encode_u64(global_commit_ts))
            .await?;
        self.completed.remove(&txn_id);
        debug!(%txn_id, global_commit_ts, "global commit recorded");
        Ok(())
    }

    /// Ids of active transactions whose begin timestamp is in `[min, max]`,
    /// optionally only those that wrote to `destination`.
    pub async fn active_transactions(&self, min: u64, max: u64, destination: Option<&str>) -> Result<Vec<TxnId>> {
        let mut out = Vec::new();
        for row in self.partition.scan(&[]).await? {
            let txn_id = codec::txn_id_from_key(&row.key)?;
            let txn = codec::decode(txn_id, &row.columns)?;
            if self.adjust_state_for_timeout(txn.state, txn.keep_alive_timestamp) != TxnState::Active {
                continue;
            }
            if txn.begin_timestamp < min || txn.begin_timestamp > max {
                continue;
            }
            if let Some(table) = destination {
                if !txn.destination_tables.contains(table) {
                    continue;
                }
            }
            out.push(txn_id);
        }
        Ok(out)
    }

    async fn check_parent(&self, parent: Option<TxnId>) -> Result<Option<Arc<TxnView>>> {
        let Some(parent) = parent else { return Ok(None) };
        let view = self.view(parent).await?;
        let state = view.effective_state();
        if state == TxnState::RolledBack {
            return Err(TxnError::CannotCommit { txn: parent, state });
        }
        Ok(Some(view))
    }

    /// Decode the stored record without timeout derivation or caching.
    async fn load(&self, txn_id: TxnId) -> Result<Option<Txn>> {
        let columns = self.partition.get_row(&codec::row_key(txn_id)).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        codec::decode(txn_id, &columns).map(Some)
    }

    fn transition_lock(&self, txn_id: TxnId) -> &Mutex<()> {
        &self.transitions[(txn_id.0 % TRANSITION_STRIPES as u64) as usize]
    }

    fn is_timed_out(&self, keep_alive: u64) -> bool {
        let limit = self.config.timeout_ms.saturating_add(self.config.timeout_fudge_ms);
        self.clock.now_millis().saturating_sub(keep_alive) > limit
    }

    async fn write_state(&self, txn_id: TxnId, state: TxnState) -> Result<()> {
        self.partition.put(&codec::row_key(txn_id), codec::STATE, codec::encode_state(state)).await?;
        Ok(())
    }

    async fn write_back_timeout(&self, txn_id: TxnId) {
        TXN_TIMEOUTS.inc();
        info!(%txn_id, "transaction timed out");
        if let Err(e) = self.write_state(txn_id, TxnState::RolledBack).await {
            warn!(%txn_id, error = %e, "failed to record timeout");
        }
    }
}

#[async_trait::async_trait]
impl TxnSupplier for TxnStore {
    async fn get_transaction(&self, txn_id: TxnId) -> Result<Option<Arc<Txn>>> {
        if let Some(txn) = self.completed.get(&txn_id) {
            TXN_CACHE_HITS.inc();
            return Ok(Some(txn));
        }
        let Some(mut txn) = self.load(txn_id).await? else { return Ok(None) };
        let adjusted = self.adjust_state_for_timeout(txn.state, txn.keep_alive_timestamp);
        if adjusted != txn.state {
            debug!(%txn_id, keep_alive = txn.keep_alive_timestamp, "treating silent transaction as rolled back");
            txn.state = adjusted;
        }
        let txn = Arc::new(txn);
        if txn.state.is_final() {
            self.completed.insert(txn_id, txn.clone());
        }
        Ok(Some(txn))
    }
}
