//! Heartbeats for long-running transactions and explicit cancellation.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stratum_metrics::KEEPALIVE_FAILURES;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::store::TxnStore;
use crate::txn::TxnId;

/// Published when a transaction is cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelSignal {
    /// Cancelled transaction.
    pub txn_id: TxnId,
    /// Why it was cancelled.
    pub reason: String,
}

/// Receives `Some(signal)` once the transaction is cancelled.
pub type CancellationWatch = watch::Receiver<Option<CancelSignal>>;

struct Tracked {
    terminal: Arc<AtomicBool>,
    cancel: watch::Sender<Option<CancelSignal>>,
    task: JoinHandle<()>,
}

impl Tracked {
    fn stop(&self) {
        self.terminal.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

type TrackedMap = Arc<Mutex<HashMap<TxnId, Tracked>>>;

/// Keeps active transactions alive with a periodic heartbeat.
pub struct KeepAliveScheduler {
    store: Arc<TxnStore>,
    interval: Duration,
    tracked: TrackedMap,
    signals: broadcast::Sender<CancelSignal>,
}

impl KeepAliveScheduler {
    /// Heartbeat through `store` at its configured interval.
    pub fn new(store: Arc<TxnStore>) -> Self {
        let interval = store.config().keep_alive_interval();
        let (signals, _) = broadcast::channel(64);
        Self { store, interval, tracked: Arc::new(Mutex::new(HashMap::new())), signals }
    }

    /// Every cancellation, for any transaction.
    pub fn subscribe(&self) -> broadcast::Receiver<CancelSignal> {
        self.signals.subscribe()
    }

    /// Start heartbeating `txn_id`. Scheduling an already tracked transaction
    /// returns a new watch on the existing heartbeat.
    pub fn schedule(&self, txn_id: TxnId) -> CancellationWatch {
        let mut tracked = self.tracked.lock();
        if let Some(existing) = tracked.get(&txn_id) {
            return existing.cancel.subscribe();
        }
        let terminal = Arc::new(AtomicBool::new(false));
        let (cancel, watch) = watch::channel(None);
        let task = tokio::spawn(heartbeat(
            txn_id,
            self.store.clone(),
            self.interval,
            terminal.clone(),
            Arc::downgrade(&self.tracked),
        ));
        tracked.insert(txn_id, Tracked { terminal, cancel, task });
        trace!(%txn_id, "keep-alive scheduled");
        watch
    }

    /// Whether `txn_id` still has a heartbeat.
    pub fn is_tracked(&self, txn_id: TxnId) -> bool {
        self.tracked.lock().contains_key(&txn_id)
    }

    /// Stop the heartbeat, notify listeners and roll the transaction back.
    pub async fn cancel(&self, txn_id: TxnId, reason: impl Into<String>) -> Result<()> {
        let signal = CancelSignal { txn_id, reason: reason.into() };
        info!(%txn_id, reason = %signal.reason, "cancelling transaction");
        if let Some(entry) = self.tracked.lock().remove(&txn_id) {
            entry.stop();
            let _ = entry.cancel.send(Some(signal.clone()));
        }
        let _ = self.signals.send(signal);
        self.store.rollback(txn_id).await
    }

    /// Stop tracking after the transaction finished normally.
    pub fn finish(&self, txn_id: TxnId) {
        if let Some(entry) = self.tracked.lock().remove(&txn_id) {
            entry.stop();
            trace!(%txn_id, "keep-alive finished");
        }
    }

    /// Stop every heartbeat and roll back whatever was still tracked.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.tracked.lock().drain().collect();
        info!(count = drained.len(), "keep-alive scheduler shutting down");
        for (txn_id, entry) in drained {
            entry.stop();
            if let Err(e) = self.store.rollback(txn_id).await {
                warn!(%txn_id, error = %e, "rollback during shutdown failed");
            }
        }
    }
}

impl Drop for KeepAliveScheduler {
    fn drop(&mut self) {
        for entry in self.tracked.lock().values() {
            entry.stop();
        }
    }
}

/// Remove `txn_id` only while it still maps to the heartbeat owning
/// `terminal`; a later `schedule` of the same id keeps its entry.
fn untrack(tracked: &Mutex<HashMap<TxnId, Tracked>>, txn_id: TxnId, terminal: &Arc<AtomicBool>) -> bool {
    let mut tracked = tracked.lock();
    match tracked.get(&txn_id) {
        Some(entry) if Arc::ptr_eq(&entry.terminal, terminal) => {
            tracked.remove(&txn_id);
            true
        }
        _ => false,
    }
}

async fn heartbeat(
    txn_id: TxnId,
    store: Arc<TxnStore>,
    interval: Duration,
    terminal: Arc<AtomicBool>,
    tracked: std::sync::Weak<Mutex<HashMap<TxnId, Tracked>>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if terminal.load(Ordering::SeqCst) {
            return;
        }
        match store.keep_alive(txn_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%txn_id, "transaction no longer active, heartbeat stops");
                terminal.store(true, Ordering::SeqCst);
                if let Some(tracked) = tracked.upgrade() {
                    untrack(&tracked, txn_id, &terminal);
                }
                return;
            }
            Err(e) => {
                KEEPALIVE_FAILURES.inc();
                warn!(%txn_id, error = %e, "keep-alive failed, retrying next tick");
            }
        }
    }
}
