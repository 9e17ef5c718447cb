//! Checks a whole write batch for one transaction.
use std::collections::HashSet;

use bytes::Bytes;
use stratum_metrics::WRITE_CONFLICTS;
use stratum_txn::{Result, TxnError, TxnId, TxnSupplier, TxnView};
use tracing::debug;

use crate::constraint::{Constraint, ConstraintContext, UniqueConstraint};
use crate::mutation::{ConflictResult, KvPair};
use crate::write_write::{detect_write_conflict, WriteHistory};

/// Result for one mutation of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    /// Target row.
    pub row_key: Bytes,
    /// Check outcome.
    pub result: ConflictResult,
    /// Earlier writer responsible for a write conflict.
    pub conflicting_txn: Option<TxnId>,
    /// Constraint responsible for a rejection.
    pub constraint: Option<ConstraintContext>,
}

/// Per-row results of [`BatchChecker::check`], in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Writing transaction.
    pub txn_id: TxnId,
    /// One entry per mutation.
    pub rows: Vec<RowOutcome>,
}

impl BatchOutcome {
    /// `true` when every row succeeded.
    pub fn is_success(&self) -> bool {
        self.rows.iter().all(|r| r.result.is_success())
    }

    /// The first failed row translated into a [`TxnError`].
    pub fn first_error(&self) -> Option<TxnError> {
        let row = self.rows.iter().find(|r| !r.result.is_success())?;
        let other = row.conflicting_txn.unwrap_or(self.txn_id);
        Some(match row.result {
            ConflictResult::WriteConflict => TxnError::WriteConflict { txn: self.txn_id, other },
            ConflictResult::AdditiveWriteConflict => TxnError::AdditiveWriteConflict { txn: self.txn_id, other },
            ConflictResult::Failure | ConflictResult::Success => TxnError::ConstraintViolation {
                txn: self.txn_id,
                constraint: row.constraint.as_ref().map_or_else(|| "unknown".to_string(), |c| c.to_string()),
            },
        })
    }
}

/// Runs constraints and write-write detection over a batch.
#[derive(Default)]
pub struct BatchChecker {
    constraints: Vec<Box<dyn Constraint>>,
}

impl BatchChecker {
    /// Checker running `constraints` in order.
    pub fn new(constraints: Vec<Box<dyn Constraint>>) -> Self {
        Self { constraints }
    }

    /// Checker with a single unique constraint.
    pub fn unique(context: ConstraintContext) -> Self {
        Self::new(vec![Box::new(UniqueConstraint::new(context))])
    }

    /// Check `batch` written by `txn`. A read-only or finished transaction
    /// fails outright; otherwise every row gets an outcome.
    pub async fn check(
        &self,
        txn: &TxnView,
        batch: &[KvPair],
        history: &dyn WriteHistory,
        supplier: &dyn TxnSupplier,
    ) -> Result<BatchOutcome> {
        txn.ensure_writable()?;
        let mut prior: HashSet<Bytes> = HashSet::with_capacity(batch.len());
        let mut rows = Vec::with_capacity(batch.len());
        for kv in batch {
            let mut outcome =
                RowOutcome { row_key: kv.row_key.clone(), result: ConflictResult::Success, conflicting_txn: None, constraint: None };
            for constraint in &self.constraints {
                let result = constraint.validate(kv, txn, &prior);
                if !result.is_success() {
                    outcome.result = result;
                    outcome.constraint = Some(constraint.context().clone());
                    break;
                }
            }
            if outcome.result.is_success() {
                let (result, other) = detect_write_conflict(txn, &kv.row_key, history, supplier).await?;
                if result == ConflictResult::WriteConflict {
                    WRITE_CONFLICTS.inc();
                }
                outcome.result = result;
                outcome.conflicting_txn = other;
            }
            if !outcome.result.is_success() {
                debug!(txn = %txn.txn_id(), row = ?kv.row_key, result = ?outcome.result, "mutation rejected");
            }
            prior.insert(kv.row_key.clone());
            rows.push(outcome);
        }
        Ok(BatchOutcome { txn_id: txn.txn_id(), rows })
    }
}
