//! Asynchronous resolution behind a bounded, never-blocking queue.
//!
//! Readers hand cells off with [`PartitionReadResolver::resolve`]. When the
//! queue is full, or the resolver is not running, the event is dropped: a
//! later reader will simply try again.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use stratum_metrics::RESOLUTIONS_DROPPED;
use stratum_txn::{TxnId, TxnSupplier};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::region::{ResolvableRegion, RollForward};
use crate::resolver::SynchronousReadResolver;
use crate::status::RollForwardStatus;

/// Worker pool and queue sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Consumer tasks.
    pub threads: usize,
    /// Queue capacity, rounded up to a power of two.
    pub queue_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { threads: 4, queue_size: 16_384 }
    }
}

struct ResolveEvent {
    region: Arc<dyn ResolvableRegion>,
    row_key: Bytes,
    txn_id: TxnId,
    roll_forward: Arc<dyn RollForward>,
}

/// Shared queue plus the consumers draining it.
pub struct AsyncReadResolver {
    sender: mpsc::Sender<ResolveEvent>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ResolveEvent>>>,
    supplier: Arc<dyn TxnSupplier>,
    status: Arc<RollForwardStatus>,
    threads: usize,
    capacity: usize,
    stopped: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncReadResolver {
    /// Build the queue. Nothing is consumed until [`start`](Self::start).
    pub fn new(config: &ResolverConfig, supplier: Arc<dyn TxnSupplier>, status: Arc<RollForwardStatus>) -> Self {
        let capacity = config.queue_size.max(1).next_power_of_two();
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            supplier,
            status,
            threads: config.threads.max(1),
            capacity,
            stopped: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Effective queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters shared with every consumer.
    pub fn status(&self) -> &Arc<RollForwardStatus> {
        &self.status
    }

    /// Spawn the consumers. Calling it again is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        for worker in 0..self.threads {
            let receiver = self.receiver.clone();
            let supplier = self.supplier.clone();
            let status = self.status.clone();
            workers.push(tokio::spawn(consume(worker, receiver, supplier, status)));
        }
        info!(threads = self.threads, capacity = self.capacity, "read resolver started");
    }

    /// Stop accepting events and stop the consumers. Queued events are discarded.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
        info!("read resolver stopped");
    }

    /// Handle bound to one region.
    pub fn resolver(&self, region: Arc<dyn ResolvableRegion>, roll_forward: Arc<dyn RollForward>) -> PartitionReadResolver {
        PartitionReadResolver {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
            status: self.status.clone(),
            region,
            roll_forward,
        }
    }
}

impl Drop for AsyncReadResolver {
    fn drop(&mut self) {
        for worker in self.workers.lock().iter() {
            worker.abort();
        }
    }
}

async fn consume(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ResolveEvent>>>,
    supplier: Arc<dyn TxnSupplier>,
    status: Arc<RollForwardStatus>,
) {
    loop {
        let event = receiver.lock().await.recv().await;
        let Some(event) = event else {
            debug!(worker, "resolve queue closed");
            return;
        };
        let resolved =
            SynchronousReadResolver::resolve(&*event.region, &event.row_key, event.txn_id, &*supplier, &status).await;
        if resolved {
            event.roll_forward.record_resolved(&event.row_key, event.txn_id);
        }
    }
}

/// Enqueue-only handle for one region. Cheap to clone.
#[derive(Clone)]
pub struct PartitionReadResolver {
    sender: mpsc::Sender<ResolveEvent>,
    stopped: Arc<AtomicBool>,
    status: Arc<RollForwardStatus>,
    region: Arc<dyn ResolvableRegion>,
    roll_forward: Arc<dyn RollForward>,
}

impl PartitionReadResolver {
    /// Queue resolution of `row_key` written by `txn_id`. Never blocks;
    /// returns `false` if the event was dropped.
    pub fn resolve(&self, row_key: &[u8], txn_id: TxnId) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            self.dropped();
            return false;
        }
        let event = ResolveEvent {
            region: self.region.clone(),
            row_key: Bytes::copy_from_slice(row_key),
            txn_id,
            roll_forward: self.roll_forward.clone(),
        };
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                trace!(region = self.region.name(), %txn_id, "resolve queue full");
                self.dropped();
                false
            }
        }
    }

    fn dropped(&self) {
        self.status.record_dropped();
        RESOLUTIONS_DROPPED.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::NoopRollForward;
    use crate::testing::{store, table};
    use std::time::Duration;
    use stratum_storage::Stamp;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(Vec<u8>, TxnId)>>);

    impl RollForward for Recording {
        fn record_resolved(&self, row_key: &[u8], txn_id: TxnId) {
            self.0.lock().push((row_key.to_vec(), txn_id));
        }
    }

    #[tokio::test]
    async fn capacity_rounds_to_power_of_two() {
        let (txns, _) = store().await;
        let cfg = ResolverConfig { threads: 1, queue_size: 1000 };
        let resolver = AsyncReadResolver::new(&cfg, txns, Arc::new(RollForwardStatus::default()));
        assert_eq!(resolver.capacity(), 1024);
    }

    #[tokio::test]
    async fn full_queue_drops_immediately() {
        let (txns, _) = store().await;
        let (t, _) = table("users");
        let status = Arc::new(RollForwardStatus::default());
        let cfg = ResolverConfig { threads: 2, queue_size: 16 };
        let resolver = AsyncReadResolver::new(&cfg, txns, status.clone());
        let handle = resolver.resolver(Arc::new(t), Arc::new(NoopRollForward));

        for i in 0..16u64 {
            assert!(handle.resolve(&i.to_be_bytes(), TxnId(1)));
        }
        let started = std::time::Instant::now();
        assert!(!handle.resolve(b"one-too-many", TxnId(1)));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(status.snapshot().dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn consumers_stamp_and_report() {
        let (txns, _) = store().await;
        let (t, _) = table("users");
        let txn = txns.create(None, None, None).await.unwrap();
        t.write(b"k", txn.txn_id.0, Some(bytes::Bytes::from_static(b"v"))).await.unwrap();
        let commit_ts = txns.commit(txn.txn_id).await.unwrap();

        let status = Arc::new(RollForwardStatus::default());
        let resolver = AsyncReadResolver::new(&ResolverConfig::default(), txns, status.clone());
        resolver.start();
        let recorded = Arc::new(Recording::default());
        let handle = resolver.resolver(Arc::new(t.clone()), recorded.clone());
        assert!(handle.resolve(b"k", txn.txn_id));

        for _ in 0..100 {
            if !recorded.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorded.0.lock().as_slice(), &[(b"k".to_vec(), txn.txn_id)]);
        assert_eq!(t.versions(b"k").await.unwrap()[0].stamp, Some(Stamp::Committed(commit_ts)));
        assert_eq!(status.snapshot().committed, 1);

        resolver.shutdown();
        assert!(!handle.resolve(b"k", txn.txn_id));
    }
}
