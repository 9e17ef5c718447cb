//! Constraints evaluated against a write batch.
use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use stratum_txn::TxnView;

use crate::mutation::{ConflictResult, KvPair, MutationType};

/// Identifies the table and constraint a check belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintContext {
    /// Owning table.
    pub table: String,
    /// Constraint name.
    pub name: String,
}

impl ConstraintContext {
    /// Build a context.
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self { table: table.into(), name: name.into() }
    }
}

impl fmt::Display for ConstraintContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// A rule checked for every mutation of a batch.
pub trait Constraint: Send + Sync {
    /// What this constraint guards.
    fn context(&self) -> &ConstraintContext;

    /// Check `mutation` given the row keys already visited in the same batch.
    fn validate(&self, mutation: &KvPair, txn: &TxnView, prior: &HashSet<Bytes>) -> ConflictResult;
}

/// Rejects a second insert of the same row key within one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    context: ConstraintContext,
}

impl UniqueConstraint {
    /// Unique constraint described by `context`.
    pub fn new(context: ConstraintContext) -> Self {
        Self { context }
    }
}

impl Constraint for UniqueConstraint {
    fn context(&self) -> &ConstraintContext {
        &self.context
    }

    fn validate(&self, mutation: &KvPair, _txn: &TxnView, prior: &HashSet<Bytes>) -> ConflictResult {
        match mutation.mutation {
            MutationType::Insert | MutationType::Upsert if prior.contains(&mutation.row_key) => {
                if mutation.mutation == MutationType::Upsert {
                    ConflictResult::AdditiveWriteConflict
                } else {
                    ConflictResult::Failure
                }
            }
            _ => ConflictResult::Success,
        }
    }
}
