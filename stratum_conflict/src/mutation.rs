//! Mutations and their conflict outcomes.
use bytes::Bytes;

/// Outcome of checking one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResult {
    /// The mutation may proceed.
    Success,
    /// A constraint rejected the mutation.
    Failure,
    /// Another transaction holds a conflicting write.
    WriteConflict,
    /// The conflict is between additive writes.
    AdditiveWriteConflict,
}

impl ConflictResult {
    /// `true` for [`ConflictResult::Success`].
    pub fn is_success(self) -> bool {
        self == ConflictResult::Success
    }
}

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    /// Write a row that must not exist.
    Insert,
    /// Modify an existing row.
    Update,
    /// Insert or overwrite.
    Upsert,
    /// Remove a row.
    Delete,
}

/// One row mutation in a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Target row.
    pub row_key: Bytes,
    /// Encoded row, empty for deletes.
    pub value: Bytes,
    /// Mutation kind.
    pub mutation: MutationType,
}

impl KvPair {
    /// Build a mutation.
    pub fn new(mutation: MutationType, row_key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { row_key: row_key.into(), value: value.into(), mutation }
    }
}
