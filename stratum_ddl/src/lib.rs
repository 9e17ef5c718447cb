//! DDL visibility demarcation.
//!
//! A schema change is applied by a DDL transaction. Its commit timestamp is
//! the demarcation point: transactions that began after it observe the new
//! schema directly, everything older must be handled by a separate
//! population phase. [`DdlFilter`] answers which side of that line a
//! transaction is on.
#![deny(missing_docs)]

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use stratum_txn::{ExpiringCache, Result, TxnId, TxnState, TxnSupplier, TxnView};
use tracing::{debug, trace};

/// Visibility cache sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DdlConfig {
    /// Cached answers per filter.
    pub cache_size: usize,
    /// Lifetime of a cached answer.
    pub cache_ttl_ms: u64,
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self { cache_size: 10_000, cache_ttl_ms: 60_000 }
    }
}

/// Decides whether a transaction falls after a DDL transaction's commit.
pub struct DdlFilter {
    owner: RwLock<Arc<TxnView>>,
    visibility: ExpiringCache<TxnId, bool>,
}

impl DdlFilter {
    /// Filter for the DDL transaction `owner`.
    pub fn new(owner: Arc<TxnView>, config: &DdlConfig) -> Self {
        Self {
            owner: RwLock::new(owner),
            visibility: ExpiringCache::new(config.cache_size, Duration::from_millis(config.cache_ttl_ms)),
        }
    }

    /// The DDL transaction as last seen.
    pub fn transaction(&self) -> Arc<TxnView> {
        self.owner.read().clone()
    }

    /// Whether `txn` began after the DDL transaction committed.
    ///
    /// Nothing is visible while the DDL transaction is uncommitted or under a
    /// rolled-back parent; those answers are not cached since they may change.
    pub fn is_visible_by(&self, txn: &TxnView) -> bool {
        if let Some(visible) = self.visibility.get(&txn.txn_id()) {
            return visible;
        }
        let owner = self.transaction();
        if owner.state() != TxnState::Committed {
            return false;
        }
        if owner.parent().is_some_and(|p| p.effective_state() == TxnState::RolledBack) {
            return false;
        }
        let Some(demarcation) = owner.effective_commit_timestamp().or(owner.txn().commit_timestamp) else {
            return false;
        };
        let visible = txn.txn_id().0 > demarcation;
        trace!(ddl = %owner.txn_id(), txn = %txn.txn_id(), demarcation, visible, "ddl visibility");
        self.visibility.insert(txn.txn_id(), visible);
        visible
    }

    /// Replace the DDL transaction view and forget cached answers.
    pub fn refresh(&self, owner: Arc<TxnView>) {
        debug!(ddl = %owner.txn_id(), state = ?owner.state(), "ddl filter refreshed");
        *self.owner.write() = owner;
        self.visibility.clear();
    }

    /// Re-read the DDL transaction through `supplier` and [`refresh`](Self::refresh).
    pub async fn reload(&self, supplier: &dyn TxnSupplier) -> Result<()> {
        let txn_id = self.transaction().txn_id();
        let owner = supplier.view(txn_id).await?;
        self.refresh(owner);
        Ok(())
    }
}

impl Ord for DdlFilter {
    /// Committed filters order by commit timestamp and after every
    /// uncommitted one; uncommitted filters order by effective begin.
    fn cmp(&self, other: &Self) -> Ordering {
        if std::ptr::eq(self, other) {
            return Ordering::Equal;
        }
        let (mine, theirs) = (self.transaction(), other.transaction());
        match (mine.state() == TxnState::Committed, theirs.state() == TxnState::Committed) {
            (true, true) => mine.txn().commit_timestamp.cmp(&theirs.txn().commit_timestamp),
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => mine.effective_begin_timestamp().cmp(&theirs.effective_begin_timestamp()),
        }
    }
}

impl PartialOrd for DdlFilter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DdlFilter {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DdlFilter {}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_storage::MemoryPartition;
    use stratum_timestamp::{MemoryHighWaterMark, TimestampOracle};
    use stratum_txn::{SystemClock, Txn, TxnConfig, TxnStore};

    fn view(id: u64, state: TxnState, commit: Option<u64>) -> Arc<TxnView> {
        let mut t = Txn::new(TxnId(id), id, 0);
        t.state = state;
        t.commit_timestamp = commit;
        Arc::new(TxnView::new(Arc::new(t), None))
    }

    fn reader(id: u64) -> TxnView {
        TxnView::new(Arc::new(Txn::new(TxnId(id), id, 0)), None)
    }

    #[test]
    fn demarcation_by_commit_timestamp() {
        let filter = DdlFilter::new(view(500, TxnState::Committed, Some(600)), &DdlConfig::default());
        assert!(!filter.is_visible_by(&reader(550)));
        assert!(filter.is_visible_by(&reader(650)));
        assert!(!filter.is_visible_by(&reader(600)));
    }

    #[test]
    fn uncommitted_owner_hides_everything() {
        let filter = DdlFilter::new(view(500, TxnState::Active, None), &DdlConfig::default());
        assert!(!filter.is_visible_by(&reader(10_000)));
        filter.refresh(view(500, TxnState::Committed, Some(600)));
        assert!(filter.is_visible_by(&reader(10_000)));
    }

    #[test]
    fn rolled_back_parent_hides_everything() {
        let parent = view(400, TxnState::RolledBack, None);
        let mut child = Txn::new(TxnId(500), 500, 0);
        child.parent_txn_id = Some(TxnId(400));
        child.state = TxnState::Committed;
        child.commit_timestamp = Some(600);
        let owner = Arc::new(TxnView::new(Arc::new(child), Some(parent)));
        let filter = DdlFilter::new(owner, &DdlConfig::default());
        assert!(!filter.is_visible_by(&reader(650)));
    }

    #[test]
    fn refresh_drops_cached_answers() {
        let filter = DdlFilter::new(view(500, TxnState::Committed, Some(600)), &DdlConfig::default());
        assert!(!filter.is_visible_by(&reader(550)));
        filter.refresh(view(500, TxnState::Committed, Some(520)));
        assert!(filter.is_visible_by(&reader(550)));
    }

    #[test]
    fn committed_filters_sort_last() {
        let mut filters = vec![
            DdlFilter::new(view(50, TxnState::Committed, Some(90)), &DdlConfig::default()),
            DdlFilter::new(view(70, TxnState::Active, None), &DdlConfig::default()),
            DdlFilter::new(view(40, TxnState::Committed, Some(80)), &DdlConfig::default()),
            DdlFilter::new(view(60, TxnState::Active, None), &DdlConfig::default()),
        ];
        filters.sort();
        let ids: Vec<u64> = filters.iter().map(|f| f.transaction().txn_id().0).collect();
        assert_eq!(ids, vec![60, 70, 40, 50]);
    }

    #[tokio::test]
    async fn reload_picks_up_commit() {
        let oracle = TimestampOracle::open(Arc::new(MemoryHighWaterMark::default()), 64).await.unwrap();
        let store = TxnStore::new(
            Arc::new(MemoryPartition::new("txn")),
            Arc::new(oracle),
            Arc::new(SystemClock),
            TxnConfig::default(),
        );
        let ddl = store.create(None, None, None).await.unwrap();
        let filter = DdlFilter::new(store.view(ddl.txn_id).await.unwrap(), &DdlConfig::default());
        let before = store.create(None, None, None).await.unwrap();
        store.commit(ddl.txn_id).await.unwrap();
        let after = store.create(None, None, None).await.unwrap();

        let before_view = store.view(before.txn_id).await.unwrap();
        let after_view = store.view(after.txn_id).await.unwrap();
        assert!(!filter.is_visible_by(&after_view));
        filter.reload(&store).await.unwrap();
        assert!(!filter.is_visible_by(&before_view));
        assert!(filter.is_visible_by(&after_view));
    }
}
