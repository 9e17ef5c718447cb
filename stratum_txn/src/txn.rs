//! Transaction identity, state and the durable record.
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction identifier. Equal to the transaction's begin timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state. Terminal once not `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnState {
    /// Running.
    Active,
    /// Committed.
    Committed,
    /// Rolled back, explicitly or by timeout.
    RolledBack,
}

impl TxnState {
    /// `true` for committed or rolled back.
    pub fn is_final(self) -> bool {
        !matches!(self, TxnState::Active)
    }

    /// Single byte stored in the state slot.
    pub fn to_byte(self) -> u8 {
        match self {
            TxnState::Active => 1,
            TxnState::Committed => 2,
            TxnState::RolledBack => 3,
        }
    }

    /// Inverse of [`TxnState::to_byte`].
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(TxnState::Active),
            2 => Some(TxnState::Committed),
            3 => Some(TxnState::RolledBack),
            _ => None,
        }
    }
}

/// How much of other transactions' work a reader observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Any write that has not been rolled back.
    ReadUncommitted,
    /// Any effectively committed write.
    ReadCommitted,
    /// Writes committed at or before the reader's begin timestamp.
    #[default]
    SnapshotIsolation,
}

impl IsolationLevel {
    /// Encoded level.
    pub fn to_byte(self) -> u8 {
        match self {
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::ReadCommitted => 2,
            IsolationLevel::SnapshotIsolation => 3,
        }
    }

    /// Decode a level byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(IsolationLevel::ReadUncommitted),
            2 => Some(IsolationLevel::ReadCommitted),
            3 => Some(IsolationLevel::SnapshotIsolation),
            _ => None,
        }
    }
}

/// Durable transaction record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Txn {
    /// Unique id, never reused.
    pub txn_id: TxnId,
    /// Begin timestamp.
    pub begin_timestamp: u64,
    /// Parent in the transaction tree.
    pub parent_txn_id: Option<TxnId>,
    /// Additive writers do not conflict with each other.
    pub additive: Option<bool>,
    /// Requested isolation; `None` means snapshot isolation.
    pub isolation_level: Option<IsolationLevel>,
    /// Own commit timestamp.
    pub commit_timestamp: Option<u64>,
    /// Commit timestamp propagated from a coordinated commit.
    pub global_commit_timestamp: Option<u64>,
    /// Recorded state.
    pub state: TxnState,
    /// Millis of the last heartbeat.
    pub keep_alive_timestamp: u64,
    /// Tables this transaction has written to.
    pub destination_tables: BTreeSet<String>,
}

impl Txn {
    /// New `Active` root-level record.
    pub fn new(txn_id: TxnId, begin_timestamp: u64, keep_alive_timestamp: u64) -> Self {
        Self {
            txn_id,
            begin_timestamp,
            parent_txn_id: None,
            additive: None,
            isolation_level: None,
            commit_timestamp: None,
            global_commit_timestamp: None,
            state: TxnState::Active,
            keep_alive_timestamp,
            destination_tables: BTreeSet::new(),
        }
    }

    /// Whether writes are additive.
    pub fn is_additive(&self) -> bool {
        self.additive.unwrap_or(false)
    }

    /// Isolation level with the default applied.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation_level.unwrap_or_default()
    }
}
