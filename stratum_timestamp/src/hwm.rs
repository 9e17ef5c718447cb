//! Durable high-water mark backing the oracle's reservations.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crc32c::crc32c;
use tokio::io::AsyncWriteExt;

use crate::{Timestamp, TimestampError};

/// Coordination primitive that stores the highest reserved timestamp.
///
/// `store` must be durable when it returns `Ok`.
#[async_trait::async_trait]
pub trait HighWaterMark: Send + Sync {
    /// Last durably stored value, `0` if nothing was ever stored.
    async fn load(&self) -> Result<Timestamp, TimestampError>;

    /// Durably record `value`. Values never move backwards.
    async fn store(&self, value: Timestamp) -> Result<(), TimestampError>;
}

/// Process-local high-water mark; survives "restarts" that reuse the same instance.
#[derive(Debug, Default)]
pub struct MemoryHighWaterMark {
    value: AtomicU64,
    failing: AtomicBool,
    stores: AtomicU64,
}

impl MemoryHighWaterMark {
    /// Start from an existing mark.
    pub fn starting_at(value: Timestamp) -> Self {
        Self { value: AtomicU64::new(value), ..Default::default() }
    }

    /// Make `store` fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current value.
    pub fn value(&self) -> Timestamp {
        self.value.load(Ordering::SeqCst)
    }

    /// Number of successful stores.
    pub fn store_count(&self) -> u64 {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HighWaterMark for MemoryHighWaterMark {
    async fn load(&self) -> Result<Timestamp, TimestampError> {
        Ok(self.value())
    }

    async fn store(&self, value: Timestamp) -> Result<(), TimestampError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TimestampError::Persistence(io::Error::new(io::ErrorKind::Other, "store disabled")));
        }
        self.value.fetch_max(value, Ordering::SeqCst);
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// High-water mark kept in a small checksummed file.
///
/// Layout: `u64` big-endian value followed by the CRC32C of those 8 bytes.
/// Updates go to a sibling temp file which is fsynced and renamed over.
#[derive(Debug, Clone)]
pub struct FileHighWaterMark {
    path: PathBuf,
}

const FILE_LEN: usize = 12;

impl FileHighWaterMark {
    /// Use `path` as the backing file. It is created on first store.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl HighWaterMark for FileHighWaterMark {
    async fn load(&self) -> Result<Timestamp, TimestampError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TimestampError::Persistence(e)),
        };
        if raw.len() != FILE_LEN {
            return Err(TimestampError::Corrupt(format!("{} bytes in {}", raw.len(), self.path.display())));
        }
        let (value, sum) = raw.split_at(8);
        let expected = u32::from_be_bytes([sum[0], sum[1], sum[2], sum[3]]);
        if crc32c(value) != expected {
            return Err(TimestampError::Corrupt(format!("checksum mismatch in {}", self.path.display())));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(value);
        Ok(u64::from_be_bytes(bytes))
    }

    async fn store(&self, value: Timestamp) -> Result<(), TimestampError> {
        let mut buf = Vec::with_capacity(FILE_LEN);
        buf.extend_from_slice(&value.to_be_bytes());
        buf.extend_from_slice(&crc32c(&value.to_be_bytes()).to_be_bytes());

        let tmp = self.temp_path();
        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&buf).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write.await.map_err(TimestampError::Persistence)
    }
}
