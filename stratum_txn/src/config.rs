//! Transaction settings.
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TxnError};

/// Transaction store and keep-alive settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// Heartbeat period.
    pub keep_alive_interval_ms: u64,
    /// An `Active` transaction silent for longer than this is rolled back.
    pub timeout_ms: u64,
    /// Slack added to the timeout to absorb clock skew.
    pub timeout_fudge_ms: u64,
    /// Entries kept in the completed-transaction cache.
    pub completed_cache_size: usize,
    /// Lifetime of a completed-transaction cache entry.
    pub completed_cache_ttl_ms: u64,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_ms: 15_000,
            timeout_ms: 150_000,
            timeout_fudge_ms: 1_000,
            completed_cache_size: 65_536,
            completed_cache_ttl_ms: 30_000,
        }
    }
}

impl TxnConfig {
    /// Reject settings under which live transactions could time out.
    pub fn validate(&self) -> Result<()> {
        if self.keep_alive_interval_ms == 0 {
            return Err(TxnError::Config("keep_alive_interval_ms must be positive".into()));
        }
        if self.keep_alive_interval_ms >= self.timeout_ms {
            return Err(TxnError::Config(format!(
                "keep_alive_interval_ms ({}) must be below timeout_ms ({})",
                self.keep_alive_interval_ms, self.timeout_ms
            )));
        }
        if self.completed_cache_size == 0 {
            return Err(TxnError::Config("completed_cache_size must be positive".into()));
        }
        Ok(())
    }

    /// Heartbeat period as a [`Duration`].
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Completed-cache entry lifetime as a [`Duration`].
    pub fn completed_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.completed_cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TxnConfig::default().validate().unwrap();
    }

    #[test]
    fn interval_must_be_below_timeout() {
        let cfg = TxnConfig { keep_alive_interval_ms: 200, timeout_ms: 200, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(TxnError::Config(_))));
    }
}
