//! Error taxonomy.
use stratum_storage::StorageError;
use stratum_timestamp::TimestampError;

use crate::txn::{TxnId, TxnState};

/// Result alias for transaction operations.
pub type Result<T> = std::result::Result<T, TxnError>;

/// Transaction layer errors.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// Another transaction holds an overlapping, non-additive write.
    #[error("write conflict between {txn} and {other}")]
    WriteConflict {
        /// Transaction that hit the conflict.
        txn: TxnId,
        /// Existing writer.
        other: TxnId,
    },
    /// Two additive transactions wrote the same row.
    #[error("additive write conflict between {txn} and {other}")]
    AdditiveWriteConflict {
        /// Transaction that hit the conflict.
        txn: TxnId,
        /// Existing writer.
        other: TxnId,
    },
    /// The transaction (or an ancestor) is not in a state that allows the operation.
    #[error("transaction {txn} cannot proceed from state {state:?}")]
    CannotCommit {
        /// Offending transaction.
        txn: TxnId,
        /// Effective state observed.
        state: TxnState,
    },
    /// A constraint rejected a write.
    #[error("transaction {txn} violated constraint {constraint}")]
    ConstraintViolation {
        /// Writing transaction.
        txn: TxnId,
        /// Violated constraint.
        constraint: String,
    },
    /// Keep-alive expired before commit.
    #[error("transaction {0} timed out")]
    TransactionTimeout(TxnId),
    /// Write attempted through a read-only transaction.
    #[error("transaction {0} is read only")]
    ReadOnlyModification(TxnId),
    /// Stored record could not be decoded.
    #[error("malformed transaction data: {0}")]
    Format(String),
    /// No record for the id.
    #[error("transaction {0} not found")]
    NotFound(TxnId),
    /// Timestamp allocation failed.
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
    /// Invalid settings.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TxnError {
    /// Whether retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxnError::WriteConflict { .. })
    }
}

impl From<StorageError> for TxnError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Corrupt(msg) => TxnError::Format(msg),
            other => TxnError::Storage(other),
        }
    }
}
