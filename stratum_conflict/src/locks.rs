//! Row locks held from conflict check to write.
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

const DEFAULT_STRIPES: usize = 1024;

/// Striped locks over `(table, row key)`.
///
/// A writer holds the locks of every row in its batch while it checks for
/// conflicts and applies the batch, so two writers of one row never both
/// pass the check. Stripes are taken in index order.
pub struct RowLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

/// Locks held for one batch; released on drop.
pub struct RowGuard {
    _held: Vec<OwnedMutexGuard<()>>,
}

impl Default for RowLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl RowLocks {
    /// Lock table with `stripes` stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        Self { stripes: (0..stripes.max(1)).map(|_| Arc::new(Mutex::new(()))).collect() }
    }

    /// Wait for the locks covering `row_keys` of `table`.
    pub async fn lock<'a>(&self, table: &str, row_keys: impl IntoIterator<Item = &'a [u8]>) -> RowGuard {
        let mut indices: Vec<usize> = row_keys.into_iter().map(|key| self.stripe(table, key)).collect();
        indices.sort_unstable();
        indices.dedup();
        let mut held = Vec::with_capacity(indices.len());
        for index in indices {
            held.push(self.stripes[index].clone().lock_owned().await);
        }
        RowGuard { _held: held }
    }

    fn stripe(&self, table: &str, row_key: &[u8]) -> usize {
        let hash = crc32c::crc32c_append(crc32c::crc32c(table.as_bytes()), row_key);
        hash as usize % self.stripes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_row_waits_for_release() {
        let locks = RowLocks::default();
        let held = locks.lock("orders", [&b"k1"[..], b"k2", b"k1"]).await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), locks.lock("orders", [&b"k2"[..]])).await;
        assert!(blocked.is_err());
        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(20), locks.lock("orders", [&b"k2"[..]])).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn single_stripe_still_locks_whole_batches() {
        let locks = RowLocks::new(0);
        let _held = locks.lock("orders", [&b"a"[..], b"b", b"c"]).await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), locks.lock("users", [&b"z"[..]])).await;
        assert!(blocked.is_err());
    }
}
