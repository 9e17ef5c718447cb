//! Slot encoding of transaction records.
//!
//! One row per transaction, keyed by the 8-byte big-endian id. Each slot is
//! its own column so single-slot updates never rewrite the rest:
//!
//! | column | content |
//! |---|---|
//! | `d` | begin u64, then tagged optional parent u64, additive bool, isolation byte |
//! | `k` | keep-alive millis u64 |
//! | `t` | commit timestamp u64 |
//! | `g` | global commit timestamp u64 |
//! | `s` | state byte |
//! | `e` | u16 count, then u16-length-prefixed UTF-8 table names |
use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TxnError};
use crate::txn::{IsolationLevel, Txn, TxnId, TxnState};

/// Core slot.
pub const CORE: &[u8] = b"d";
/// Keep-alive slot.
pub const KEEP_ALIVE: &[u8] = b"k";
/// Commit timestamp slot.
pub const COMMIT: &[u8] = b"t";
/// Global commit timestamp slot.
pub const GLOBAL_COMMIT: &[u8] = b"g";
/// State slot.
pub const STATE: &[u8] = b"s";
/// Destination tables slot.
pub const DESTINATIONS: &[u8] = b"e";

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// Storage row key of a transaction.
pub fn row_key(txn_id: TxnId) -> [u8; 8] {
    txn_id.0.to_be_bytes()
}

/// Inverse of [`row_key`].
pub fn txn_id_from_key(key: &[u8]) -> Result<TxnId> {
    if key.len() != 8 {
        return Err(TxnError::Format(format!("transaction key of {} bytes", key.len())));
    }
    Ok(TxnId((&key[..]).get_u64()))
}

/// Encode the immutable core of a record.
pub fn encode_core(txn: &Txn) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + 9 + 2 + 2);
    buf.put_u64(txn.begin_timestamp);
    match txn.parent_txn_id {
        Some(p) => {
            buf.put_u8(PRESENT);
            buf.put_u64(p.0);
        }
        None => buf.put_u8(ABSENT),
    }
    match txn.additive {
        Some(a) => {
            buf.put_u8(PRESENT);
            buf.put_u8(a as u8);
        }
        None => buf.put_u8(ABSENT),
    }
    match txn.isolation_level {
        Some(level) => {
            buf.put_u8(PRESENT);
            buf.put_u8(level.to_byte());
        }
        None => buf.put_u8(ABSENT),
    }
    buf.freeze()
}

/// Encode a u64 slot (keep-alive, commit, global commit).
pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Encode the state slot.
pub fn encode_state(state: TxnState) -> Bytes {
    Bytes::copy_from_slice(&[state.to_byte()])
}

/// Encode the destination tables slot.
pub fn encode_destinations(tables: &BTreeSet<String>) -> Result<Bytes> {
    if tables.len() > u16::MAX as usize {
        return Err(TxnError::Format(format!("{} destination tables", tables.len())));
    }
    let mut buf = BytesMut::new();
    buf.put_u16(tables.len() as u16);
    for name in tables {
        if name.len() > u16::MAX as usize {
            return Err(TxnError::Format(format!("table name of {} bytes", name.len())));
        }
        buf.put_u16(name.len() as u16);
        buf.put_slice(name.as_bytes());
    }
    Ok(buf.freeze())
}

/// Decode a record from its slots, without applying the timeout rule.
///
/// A present commit or global commit slot forces `Committed`. A missing core
/// slot is malformed; every other missing slot counts as unset.
pub fn decode(txn_id: TxnId, columns: &[(Bytes, Bytes)]) -> Result<Txn> {
    let slot = |name: &[u8]| columns.iter().find(|(c, _)| c.as_ref() == name).map(|(_, v)| v.as_ref());

    let core = slot(CORE).ok_or_else(|| TxnError::Format(format!("transaction {txn_id} has no core slot")))?;
    let mut txn = decode_core(txn_id, core)?;

    txn.keep_alive_timestamp = slot(KEEP_ALIVE).map(decode_u64).transpose()?.unwrap_or(0);
    txn.commit_timestamp = slot(COMMIT).map(decode_u64).transpose()?;
    txn.global_commit_timestamp = slot(GLOBAL_COMMIT).map(decode_u64).transpose()?;
    txn.state = match slot(STATE) {
        Some([b]) => TxnState::from_byte(*b).ok_or_else(|| TxnError::Format(format!("state byte {b}")))?,
        Some(raw) => return Err(TxnError::Format(format!("state slot of {} bytes", raw.len()))),
        None => TxnState::Active,
    };
    if txn.commit_timestamp.is_some() || txn.global_commit_timestamp.is_some() {
        txn.state = TxnState::Committed;
    }
    if let Some(raw) = slot(DESTINATIONS) {
        txn.destination_tables = decode_destinations(raw)?;
    }
    Ok(txn)
}

fn decode_core(txn_id: TxnId, mut raw: &[u8]) -> Result<Txn> {
    let truncated = || TxnError::Format(format!("truncated core slot for {txn_id}"));
    if raw.remaining() < 8 {
        return Err(truncated());
    }
    let mut txn = Txn::new(txn_id, raw.get_u64(), 0);

    txn.parent_txn_id = take_optional(&mut raw, 8, txn_id)?.map(|mut v| TxnId(v.get_u64()));
    txn.additive = take_optional(&mut raw, 1, txn_id)?.map(|v| v[0] != 0);
    txn.isolation_level = match take_optional(&mut raw, 1, txn_id)? {
        Some(v) => Some(IsolationLevel::from_byte(v[0]).ok_or_else(|| TxnError::Format(format!("isolation byte {}", v[0])))?),
        None => None,
    };
    Ok(txn)
}

fn take_optional<'a>(raw: &mut &'a [u8], width: usize, txn_id: TxnId) -> Result<Option<&'a [u8]>> {
    let truncated = || TxnError::Format(format!("truncated core slot for {txn_id}"));
    if !raw.has_remaining() {
        return Err(truncated());
    }
    match raw.get_u8() {
        ABSENT => Ok(None),
        PRESENT if raw.len() >= width => {
            let (value, rest) = raw.split_at(width);
            *raw = rest;
            Ok(Some(value))
        }
        PRESENT => Err(truncated()),
        tag => Err(TxnError::Format(format!("bad optional tag {tag}"))),
    }
}

fn decode_u64(raw: &[u8]) -> Result<u64> {
    if raw.len() != 8 {
        return Err(TxnError::Format(format!("u64 slot of {} bytes", raw.len())));
    }
    Ok((&raw[..]).get_u64())
}

fn decode_destinations(mut raw: &[u8]) -> Result<BTreeSet<String>> {
    let truncated = || TxnError::Format("truncated destination slot".into());
    if raw.remaining() < 2 {
        return Err(truncated());
    }
    let count = raw.get_u16();
    let mut tables = BTreeSet::new();
    for _ in 0..count {
        if raw.remaining() < 2 {
            return Err(truncated());
        }
        let len = raw.get_u16() as usize;
        if raw.remaining() < len {
            return Err(truncated());
        }
        let name = std::str::from_utf8(&raw[..len]).map_err(|e| TxnError::Format(e.to_string()))?;
        tables.insert(name.to_string());
        raw.advance(len);
    }
    Ok(tables)
}
