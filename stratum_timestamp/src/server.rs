//! TCP front end for the oracle.
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument, trace};

use crate::oracle::TimestampOracle;
use crate::protocol::{TimestampRequest, TimestampResponse, REQUEST_LEN, RESPONSE_LEN};
use crate::TimestampError;

/// Serves [`TimestampRequest`]s from an oracle, one task per connection.
#[derive(Clone)]
pub struct TimestampServer {
    oracle: Arc<TimestampOracle>,
}

impl TimestampServer {
    /// Create a server handing out timestamps from `oracle`.
    pub fn new(oracle: Arc<TimestampOracle>) -> Self {
        Self { oracle }
    }

    /// Bind `addr` and serve until the task is dropped.
    pub async fn serve(self, addr: &str) -> Result<(), TimestampError> {
        let listener = TcpListener::bind(addr).await?;
        self.run(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), TimestampError> {
        info!(addr = %listener.local_addr()?, "timestamp server listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let oracle = self.oracle.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_conn(socket, peer, oracle).await {
                    error!(%peer, error = %e, "timestamp connection closed");
                }
            });
        }
    }
}

#[instrument(skip(socket, oracle))]
async fn handle_conn(mut socket: TcpStream, peer: SocketAddr, oracle: Arc<TimestampOracle>) -> Result<(), TimestampError> {
    let _ = socket.set_nodelay(true);
    let mut frame = [0u8; REQUEST_LEN];
    let mut out = BytesMut::with_capacity(RESPONSE_LEN);
    loop {
        if !read_frame(&mut socket, &mut frame).await? {
            debug!("client disconnected");
            return Ok(());
        }
        let request = TimestampRequest::decode(&mut &frame[..])?;
        let timestamp = oracle.next().await?;
        trace!(caller_id = request.caller_id, timestamp, "timestamp issued");
        out.clear();
        TimestampResponse { caller_id: request.caller_id, timestamp }.encode(&mut out);
        socket.write_all(&out).await?;
    }
}

/// Fill `frame`. `Ok(false)` on a clean end of stream between frames.
async fn read_frame(socket: &mut TcpStream, frame: &mut [u8]) -> Result<bool, TimestampError> {
    let mut filled = 0;
    while filled < frame.len() {
        let n = socket.read(&mut frame[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(TimestampError::Protocol(format!("truncated request: {filled} bytes")));
        }
        filled += n;
    }
    Ok(true)
}
