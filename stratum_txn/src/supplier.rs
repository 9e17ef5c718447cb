//! Record lookup and ancestry resolution.
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, TxnError};
use crate::txn::{Txn, TxnId};
use crate::view::TxnView;

/// Longest ancestor chain a view may resolve.
pub const MAX_ANCESTOR_DEPTH: usize = 64;

/// Source of transaction records.
#[async_trait::async_trait]
pub trait TxnSupplier: Send + Sync {
    /// Load a record with the timeout rule applied. `None` if unknown.
    async fn get_transaction(&self, txn_id: TxnId) -> Result<Option<Arc<Txn>>>;

    /// Resolve `txn_id` and its ancestors into a [`TxnView`].
    ///
    /// Ancestry is followed one lookup at a time, bounded by
    /// [`MAX_ANCESTOR_DEPTH`]; a cycle is reported as a format error.
    async fn view(&self, txn_id: TxnId) -> Result<Arc<TxnView>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(txn_id);
        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(TxnError::Format(format!("ancestry cycle through {id}")));
            }
            if chain.len() >= MAX_ANCESTOR_DEPTH {
                return Err(TxnError::Format(format!("ancestry of {txn_id} deeper than {MAX_ANCESTOR_DEPTH}")));
            }
            let txn = self.get_transaction(id).await?.ok_or(TxnError::NotFound(id))?;
            next = txn.parent_txn_id;
            chain.push(txn);
        }

        let mut view: Option<Arc<TxnView>> = None;
        for txn in chain.into_iter().rev() {
            view = Some(Arc::new(TxnView::new(txn, view)));
        }
        view.ok_or(TxnError::NotFound(txn_id))
    }
}
