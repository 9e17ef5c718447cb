//! Fixed-length timestamp frames.
//!
//! ```text
//! request:  caller_id i16
//! response: caller_id i16 | timestamp i64
//! ```
//! All integers are big endian.
use bytes::{Buf, BufMut};

use crate::{Timestamp, TimestampError};

/// Encoded request length.
pub const REQUEST_LEN: usize = 2;
/// Encoded response length.
pub const RESPONSE_LEN: usize = 10;

/// Ask for one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampRequest {
    /// Echoed back so the client can route the answer.
    pub caller_id: i16,
}

/// Answer to a [`TimestampRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampResponse {
    /// Caller id copied from the request.
    pub caller_id: i16,
    /// Allocated timestamp.
    pub timestamp: Timestamp,
}

impl TimestampRequest {
    /// Append the frame to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i16(self.caller_id);
    }

    /// Read one frame from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, TimestampError> {
        if buf.remaining() < REQUEST_LEN {
            return Err(TimestampError::Protocol(format!("truncated request: {} bytes", buf.remaining())));
        }
        Ok(Self { caller_id: buf.get_i16() })
    }
}

impl TimestampResponse {
    /// Append the frame to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i16(self.caller_id);
        buf.put_i64(self.timestamp as i64);
    }

    /// Read one frame from `buf`. Non-positive timestamps are rejected.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, TimestampError> {
        if buf.remaining() < RESPONSE_LEN {
            return Err(TimestampError::Protocol(format!("truncated response: {} bytes", buf.remaining())));
        }
        let caller_id = buf.get_i16();
        let timestamp = buf.get_i64();
        if timestamp <= 0 {
            return Err(TimestampError::Protocol(format!("invalid timestamp {timestamp}")));
        }
        Ok(Self { caller_id, timestamp: timestamp as Timestamp })
    }
}
