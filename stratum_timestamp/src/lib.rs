//! Global timestamp allocation: the oracle, its durable high-water mark and
//! the fixed-length network protocol used to reach it.
#![deny(missing_docs)]

pub mod client;
pub mod hwm;
pub mod oracle;
pub mod protocol;
pub mod server;

pub use client::TimestampClient;
pub use hwm::{FileHighWaterMark, HighWaterMark, MemoryHighWaterMark};
pub use oracle::{OracleConfig, TimestampOracle};
pub use server::TimestampServer;

/// Logical timestamp. Always within the positive 63-bit range.
pub type Timestamp = u64;

/// Largest timestamp the oracle will ever hand out.
pub const MAX_TIMESTAMP: Timestamp = i64::MAX as u64;

/// Errors raised while allocating or transporting timestamps.
#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    /// The reservation could not be made durable; nothing was handed out.
    #[error("failed to persist timestamp reservation: {0}")]
    Persistence(#[source] std::io::Error),
    /// The persisted high-water mark is unreadable.
    #[error("corrupt high-water mark: {0}")]
    Corrupt(String),
    /// The 63-bit timestamp space is used up.
    #[error("timestamp space exhausted")]
    Exhausted,
    /// The peer sent something that is not a valid frame.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The connection to the timestamp server is gone.
    #[error("timestamp connection closed")]
    Closed,
    /// Socket level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Anything that can hand out fresh, globally ordered timestamps.
#[async_trait::async_trait]
pub trait TimestampSource: Send + Sync {
    /// Return a timestamp strictly greater than any previously returned.
    async fn next_timestamp(&self) -> Result<Timestamp, TimestampError>;
}
