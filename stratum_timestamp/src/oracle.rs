//! The timestamp oracle.
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use stratum_metrics::{TIMESTAMPS_ISSUED, TIMESTAMP_RESERVATIONS, TIMESTAMP_RESERVE_LATENCY_SECS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::hwm::HighWaterMark;
use crate::{Timestamp, TimestampError, TimestampSource, MAX_TIMESTAMP};

/// Oracle settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Timestamps reserved per durable write.
    pub block_size: u64,
    /// File holding the high-water mark.
    pub high_water_mark_path: PathBuf,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self { block_size: 8192, high_water_mark_path: PathBuf::from("stratum.hwm") }
    }
}

/// Global timestamp oracle issuing strictly increasing timestamps.
///
/// Values are served from an in-memory counter; whenever the counter passes
/// the durably reserved bound a new block is reserved through the
/// [`HighWaterMark`] before the value is returned.
pub struct TimestampOracle {
    counter: AtomicU64,
    reserved: AtomicU64,
    block_size: u64,
    hwm: Arc<dyn HighWaterMark>,
    reserve_lock: Mutex<()>,
}

impl TimestampOracle {
    /// Recover from the stored high-water mark. Every value handed out later
    /// is greater than the stored mark.
    pub async fn open(hwm: Arc<dyn HighWaterMark>, block_size: u64) -> Result<Self, TimestampError> {
        let start = hwm.load().await?;
        if start >= MAX_TIMESTAMP {
            return Err(TimestampError::Exhausted);
        }
        info!(start, block_size, "timestamp oracle recovered");
        Ok(Self {
            counter: AtomicU64::new(start),
            reserved: AtomicU64::new(start),
            block_size: block_size.max(1),
            hwm,
            reserve_lock: Mutex::new(()),
        })
    }

    /// Allocate the next timestamp.
    pub async fn next(&self) -> Result<Timestamp, TimestampError> {
        let ts = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if ts > MAX_TIMESTAMP {
            return Err(TimestampError::Exhausted);
        }
        if ts > self.reserved.load(Ordering::Acquire) {
            self.reserve_through(ts).await?;
        }
        TIMESTAMPS_ISSUED.inc();
        Ok(ts)
    }

    /// Highest durably reserved timestamp.
    pub fn reserved(&self) -> Timestamp {
        self.reserved.load(Ordering::Acquire)
    }

    async fn reserve_through(&self, ts: Timestamp) -> Result<(), TimestampError> {
        let _guard = self.reserve_lock.lock().await;
        let current = self.reserved.load(Ordering::Acquire);
        if ts <= current {
            return Ok(());
        }
        let target = ts.saturating_add(self.block_size - 1).min(MAX_TIMESTAMP);
        let start = Instant::now();
        if let Err(e) = self.hwm.store(target).await {
            warn!(error = %e, target, "timestamp reservation failed");
            return Err(e);
        }
        self.reserved.store(target, Ordering::Release);
        TIMESTAMP_RESERVATIONS.inc();
        TIMESTAMP_RESERVE_LATENCY_SECS.observe(start.elapsed().as_secs_f64());
        debug!(from = current, to = target, "reserved timestamp block");
        Ok(())
    }
}

#[async_trait::async_trait]
impl TimestampSource for TimestampOracle {
    async fn next_timestamp(&self) -> Result<Timestamp, TimestampError> {
        self.next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwm::MemoryHighWaterMark;
    use std::collections::HashSet;

    #[tokio::test]
    async fn sequential_values_strictly_increase() {
        let hwm = Arc::new(MemoryHighWaterMark::default());
        let oracle = TimestampOracle::open(hwm.clone(), 100).await.unwrap();
        let mut last = 0;
        for _ in 0..1000 {
            let ts = oracle.next().await.unwrap();
            assert!(ts > last);
            last = ts;
        }
        assert_eq!(last, 1000);
        assert_eq!(hwm.store_count(), 10);
        assert!(hwm.value() >= last);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_get_distinct_values() {
        let hwm = Arc::new(MemoryHighWaterMark::default());
        let oracle = Arc::new(TimestampOracle::open(hwm, 64).await.unwrap());

        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..8000 {
            let ts = oracle.next().await.unwrap();
            assert!(ts > last);
            last = ts;
            seen.insert(ts);
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let oracle = oracle.clone();
            tasks.push(tokio::spawn(async move {
                let mut out = Vec::with_capacity(1000);
                for _ in 0..1000 {
                    out.push(oracle.next().await.unwrap());
                }
                out
            }));
        }
        for task in tasks {
            for ts in task.await.unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {ts}");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }

    #[tokio::test]
    async fn restart_never_reissues() {
        let hwm = Arc::new(MemoryHighWaterMark::default());
        let first = TimestampOracle::open(hwm.clone(), 50).await.unwrap();
        let mut last = 0;
        for _ in 0..10 {
            last = first.next().await.unwrap();
        }
        drop(first);

        let second = TimestampOracle::open(hwm.clone(), 50).await.unwrap();
        let after = second.next().await.unwrap();
        assert!(after > last);
        assert!(after > 50, "values below the reserved mark must not be reissued");
    }

    #[tokio::test]
    async fn persistence_failure_propagates() {
        let hwm = Arc::new(MemoryHighWaterMark::default());
        let oracle = TimestampOracle::open(hwm.clone(), 2).await.unwrap();
        let a = oracle.next().await.unwrap();
        let b = oracle.next().await.unwrap();
        hwm.set_failing(true);
        assert!(matches!(oracle.next().await, Err(TimestampError::Persistence(_))));
        hwm.set_failing(false);
        let c = oracle.next().await.unwrap();
        assert!(a < b && b < c);
        assert!(c <= hwm.value());
    }

    #[tokio::test]
    async fn exhausted_at_top_of_range() {
        let hwm = Arc::new(MemoryHighWaterMark::starting_at(MAX_TIMESTAMP - 1));
        let oracle = TimestampOracle::open(hwm, 8).await.unwrap();
        assert_eq!(oracle.next().await.unwrap(), MAX_TIMESTAMP);
        assert!(matches!(oracle.next().await, Err(TimestampError::Exhausted)));
    }
}
