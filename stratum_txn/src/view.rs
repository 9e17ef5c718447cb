//! Read-only projection of a transaction together with its ancestors.
use std::sync::Arc;

use crate::error::{Result, TxnError};
use crate::txn::{IsolationLevel, Txn, TxnId, TxnState};

/// Outcome of comparing two writers of the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// The writes do not conflict.
    None,
    /// Both writers are additive.
    Additive,
    /// A genuine write-write conflict.
    Conflict,
}

/// Immutable view of a transaction and its resolved ancestor chain.
#[derive(Debug, Clone)]
pub struct TxnView {
    txn: Arc<Txn>,
    parent: Option<Arc<TxnView>>,
    read_only: bool,
}

impl TxnView {
    /// View over a stored record whose parent view is already resolved.
    pub fn new(txn: Arc<Txn>, parent: Option<Arc<TxnView>>) -> Self {
        Self { txn, parent, read_only: false }
    }

    /// View of a transaction that is never persisted and may not write.
    pub fn read_only(txn: Txn, parent: Option<Arc<TxnView>>) -> Self {
        Self { txn: Arc::new(txn), parent, read_only: true }
    }

    /// Underlying record.
    pub fn txn(&self) -> &Txn {
        &self.txn
    }

    /// Transaction id.
    pub fn txn_id(&self) -> TxnId {
        self.txn.txn_id
    }

    /// Own begin timestamp.
    pub fn begin_timestamp(&self) -> u64 {
        self.txn.begin_timestamp
    }

    /// Parent view, if any.
    pub fn parent(&self) -> Option<&Arc<TxnView>> {
        self.parent.as_ref()
    }

    /// Recorded (not effective) state.
    pub fn state(&self) -> TxnState {
        self.txn.state
    }

    /// Whether this view refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether writes are additive.
    pub fn is_additive(&self) -> bool {
        self.txn.is_additive()
    }

    /// Isolation level with the default applied.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.txn.isolation()
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &TxnView> {
        std::iter::successors(self.parent.as_deref(), |v| v.parent.as_deref())
    }

    /// Rolled back if anything in the chain rolled back, committed if
    /// everything committed, active otherwise.
    pub fn effective_state(&self) -> TxnState {
        if self.txn.state == TxnState::RolledBack {
            return TxnState::RolledBack;
        }
        match self.parent.as_ref().map(|p| p.effective_state()) {
            Some(TxnState::RolledBack) => TxnState::RolledBack,
            Some(TxnState::Active) => TxnState::Active,
            Some(TxnState::Committed) | None => self.txn.state,
        }
    }

    /// Commit timestamp as seen by other transactions. `None` unless
    /// effectively committed.
    pub fn effective_commit_timestamp(&self) -> Option<u64> {
        if self.effective_state() != TxnState::Committed {
            return None;
        }
        self.chained_commit_timestamp()
    }

    fn chained_commit_timestamp(&self) -> Option<u64> {
        if let Some(global) = self.txn.global_commit_timestamp {
            return Some(global);
        }
        match &self.parent {
            Some(parent) => parent.chained_commit_timestamp(),
            None => self.txn.commit_timestamp,
        }
    }

    /// Begin timestamp of the root ancestor.
    pub fn effective_begin_timestamp(&self) -> u64 {
        self.ancestors().last().map_or(self.txn.begin_timestamp, |root| root.txn.begin_timestamp)
    }

    /// `true` if `other` is a strict ancestor of this transaction.
    pub fn descends_from(&self, other: TxnId) -> bool {
        self.ancestors().any(|a| a.txn_id() == other)
    }

    /// Fail unless this transaction may still write.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TxnError::ReadOnlyModification(self.txn_id()));
        }
        match self.effective_state() {
            TxnState::Active => Ok(()),
            state => Err(TxnError::CannotCommit { txn: self.txn_id(), state }),
        }
    }

    /// Whether data written by `writer` is visible to this transaction.
    pub fn can_see(&self, writer: &TxnView) -> bool {
        if writer.txn_id() == self.txn_id() || self.descends_from(writer.txn_id()) {
            return true;
        }
        if writer.descends_from(self.txn_id()) {
            // A child's writes become visible to us once every link below us committed.
            return std::iter::once(writer)
                .chain(writer.ancestors())
                .take_while(|v| v.txn_id() != self.txn_id())
                .all(|v| v.state() == TxnState::Committed);
        }
        match self.isolation_level() {
            IsolationLevel::ReadUncommitted => writer.effective_state() != TxnState::RolledBack,
            IsolationLevel::ReadCommitted => writer.effective_state() == TxnState::Committed,
            IsolationLevel::SnapshotIsolation => {
                writer.effective_commit_timestamp().is_some_and(|ts| ts <= self.begin_timestamp())
            }
        }
    }

    /// Classify a concurrent write of the same row by `other`.
    pub fn conflicts_with(&self, other: &TxnView) -> ConflictType {
        if other.txn_id() == self.txn_id() || self.descends_from(other.txn_id()) || other.descends_from(self.txn_id()) {
            return ConflictType::None;
        }
        match other.effective_state() {
            TxnState::RolledBack => return ConflictType::None,
            TxnState::Committed => {
                if other.effective_commit_timestamp().is_some_and(|ts| ts <= self.begin_timestamp()) {
                    return ConflictType::None;
                }
            }
            TxnState::Active => {}
        }
        if self.is_additive() && other.is_additive() {
            ConflictType::Additive
        } else {
            ConflictType::Conflict
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: u64, state: TxnState, commit: Option<u64>) -> Txn {
        let mut t = Txn::new(TxnId(id), id, 0);
        t.state = state;
        t.commit_timestamp = commit;
        t
    }

    fn view(t: Txn, parent: Option<&Arc<TxnView>>) -> Arc<TxnView> {
        Arc::new(TxnView::new(Arc::new(t), parent.cloned()))
    }

    #[test]
    fn child_waits_for_parent() {
        let parent = view(txn(10, TxnState::Active, None), None);
        let mut c = txn(12, TxnState::Committed, Some(13));
        c.parent_txn_id = Some(TxnId(10));
        let child = view(c.clone(), Some(&parent));
        assert_eq!(child.effective_state(), TxnState::Active);
        assert_eq!(child.effective_commit_timestamp(), None);
        assert_eq!(child.effective_begin_timestamp(), 10);

        let committed_parent = view(txn(10, TxnState::Committed, Some(20)), None);
        let child = view(c.clone(), Some(&committed_parent));
        assert_eq!(child.effective_state(), TxnState::Committed);
        assert_eq!(child.effective_commit_timestamp(), Some(20));

        let dead_parent = view(txn(10, TxnState::RolledBack, None), None);
        let child = view(c, Some(&dead_parent));
        assert_eq!(child.effective_state(), TxnState::RolledBack);
    }

    #[test]
    fn global_commit_wins() {
        let mut t = txn(5, TxnState::Committed, Some(8));
        t.global_commit_timestamp = Some(30);
        assert_eq!(view(t, None).effective_commit_timestamp(), Some(30));
    }

    #[test]
    fn snapshot_visibility() {
        let reader = view(txn(100, TxnState::Active, None), None);
        let early = view(txn(50, TxnState::Committed, Some(60)), None);
        let late = view(txn(90, TxnState::Committed, Some(110)), None);
        let running = view(txn(95, TxnState::Active, None), None);
        assert!(reader.can_see(&early));
        assert!(!reader.can_see(&late));
        assert!(!reader.can_see(&running));
        assert!(reader.can_see(&reader));

        let mut rc = txn(101, TxnState::Active, None);
        rc.isolation_level = Some(IsolationLevel::ReadCommitted);
        assert!(view(rc, None).can_see(&late));
        let mut ru = txn(102, TxnState::Active, None);
        ru.isolation_level = Some(IsolationLevel::ReadUncommitted);
        assert!(view(ru, None).can_see(&running));
    }

    #[test]
    fn family_visibility() {
        let parent = view(txn(10, TxnState::Active, None), None);
        let mut c = txn(11, TxnState::Active, None);
        c.parent_txn_id = Some(TxnId(10));
        let child = view(c.clone(), Some(&parent));
        assert!(child.can_see(&parent));
        assert!(!parent.can_see(&child));
        c.state = TxnState::Committed;
        c.commit_timestamp = Some(12);
        let child = view(c, Some(&parent));
        assert!(parent.can_see(&child));
        assert_eq!(parent.conflicts_with(&child), ConflictType::None);
    }

    #[test]
    fn conflict_classification() {
        let me = view(txn(100, TxnState::Active, None), None);
        assert_eq!(me.conflicts_with(&view(txn(50, TxnState::Committed, Some(60)), None)), ConflictType::None);
        assert_eq!(me.conflicts_with(&view(txn(90, TxnState::Committed, Some(110)), None)), ConflictType::Conflict);
        assert_eq!(me.conflicts_with(&view(txn(99, TxnState::RolledBack, None), None)), ConflictType::None);
        assert_eq!(me.conflicts_with(&view(txn(101, TxnState::Active, None), None)), ConflictType::Conflict);

        let mut a = txn(200, TxnState::Active, None);
        a.additive = Some(true);
        let mut b = txn(201, TxnState::Active, None);
        b.additive = Some(true);
        assert_eq!(view(a, None).conflicts_with(&view(b, None)), ConflictType::Additive);
    }

    #[test]
    fn read_only_refuses_writes() {
        let ro = TxnView::read_only(txn(7, TxnState::Active, None), None);
        assert!(matches!(ro.ensure_writable(), Err(TxnError::ReadOnlyModification(TxnId(7)))));
        let done = view(txn(8, TxnState::Committed, Some(9)), None);
        assert!(matches!(done.ensure_writable(), Err(TxnError::CannotCommit { .. })));
        view(txn(9, TxnState::Active, None), None).ensure_writable().unwrap();
    }
}
