//! Multiplexing client for the timestamp server.
//!
//! Many callers share one connection. Each in-flight request carries a caller
//! id and the background reader routes every response to its waiter.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{TimestampRequest, TimestampResponse, REQUEST_LEN, RESPONSE_LEN};
use crate::{Timestamp, TimestampError, TimestampSource};

type Waiters = Mutex<HashMap<i16, oneshot::Sender<Result<Timestamp, TimestampError>>>>;

struct Shared {
    waiters: Waiters,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self.waiters.lock().drain().collect();
        if !pending.is_empty() {
            debug!(pending = pending.len(), "failing pending timestamp requests");
        }
        for (_, waiter) in pending {
            let _ = waiter.send(Err(TimestampError::Closed));
        }
    }
}

/// Connection to a remote [`TimestampServer`](crate::TimestampServer).
pub struct TimestampClient {
    writer: AsyncMutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    next_caller: AtomicU16,
    reader: JoinHandle<()>,
}

impl TimestampClient {
    /// Connect and start the response reader.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TimestampError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let shared = Arc::new(Shared { waiters: Mutex::new(HashMap::new()), closed: AtomicBool::new(false) });
        let reader = tokio::spawn(read_responses(read, shared.clone()));
        Ok(Self { writer: AsyncMutex::new(write), shared, next_caller: AtomicU16::new(0), reader })
    }

    /// Request one timestamp.
    pub async fn next(&self) -> Result<Timestamp, TimestampError> {
        let (tx, rx) = oneshot::channel();
        let caller_id = self.register(tx)?;
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.waiters.lock().remove(&caller_id);
            return Err(TimestampError::Closed);
        }

        let mut frame = BytesMut::with_capacity(REQUEST_LEN);
        TimestampRequest { caller_id }.encode(&mut frame);
        let written = self.writer.lock().await.write_all(&frame).await;
        if let Err(e) = written {
            self.shared.waiters.lock().remove(&caller_id);
            return Err(e.into());
        }
        rx.await.map_err(|_| TimestampError::Closed)?
    }

    /// Whether the connection has been lost.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn register(&self, tx: oneshot::Sender<Result<Timestamp, TimestampError>>) -> Result<i16, TimestampError> {
        let mut waiters = self.shared.waiters.lock();
        for _ in 0..=u16::MAX as usize {
            let id = self.next_caller.fetch_add(1, Ordering::Relaxed) as i16;
            if !waiters.contains_key(&id) {
                waiters.insert(id, tx);
                return Ok(id);
            }
        }
        Err(TimestampError::Protocol("no free caller id".into()))
    }
}

impl Drop for TimestampClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait::async_trait]
impl TimestampSource for TimestampClient {
    async fn next_timestamp(&self) -> Result<Timestamp, TimestampError> {
        self.next().await
    }
}

async fn read_responses(mut read: OwnedReadHalf, shared: Arc<Shared>) {
    let mut frame = [0u8; RESPONSE_LEN];
    loop {
        if let Err(e) = read.read_exact(&mut frame).await {
            debug!(error = %e, "timestamp connection lost");
            break;
        }
        let response = match TimestampResponse::decode(&mut &frame[..]) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "bad timestamp response");
                break;
            }
        };
        match shared.waiters.lock().remove(&response.caller_id) {
            Some(waiter) => {
                let _ = waiter.send(Ok(response.timestamp));
            }
            None => warn!(caller_id = response.caller_id, "response for unknown caller"),
        }
    }
    shared.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwm::MemoryHighWaterMark;
    use crate::{TimestampOracle, TimestampServer};
    use std::collections::HashSet;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_connection() {
        let oracle = TimestampOracle::open(Arc::new(MemoryHighWaterMark::default()), 32).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(TimestampServer::new(Arc::new(oracle)).run(listener));

        let client = Arc::new(TimestampClient::connect(addr).await.unwrap());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let mut out = Vec::new();
                for _ in 0..50 {
                    out.push(client.next().await.unwrap());
                }
                out
            }));
        }
        let mut seen = HashSet::new();
        for task in tasks {
            for ts in task.await.unwrap() {
                assert!(seen.insert(ts));
            }
        }
        assert_eq!(seen.len(), 400);
    }

    #[tokio::test]
    async fn closed_connection_fails_waiters() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; REQUEST_LEN];
            sock.read_exact(&mut buf).await.unwrap();
            drop(sock);
        });

        let client = TimestampClient::connect(addr).await.unwrap();
        assert!(matches!(client.next().await, Err(TimestampError::Closed)));
        assert!(client.is_closed());
        assert!(matches!(client.next().await, Err(TimestampError::Closed)));
    }
}
