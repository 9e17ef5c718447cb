//! Bounded cache whose entries expire after a fixed lifetime.
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    inserted: Instant,
    seq: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // Insertion order; stale keys are skipped by sequence number.
    order: VecDeque<(K, u64)>,
    next_seq: u64,
}

/// Thread-safe FIFO-evicting cache with a per-entry time to live.
pub struct ExpiringCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpiringCache<K, V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { map: HashMap::new(), order: VecDeque::new(), next_seq: 0 }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Fetch a live entry.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.map.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                inner.map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry, evicting the oldest when full.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.map.insert(key.clone(), Entry { value, inserted: Instant::now(), seq });
        inner.order.push_back((key, seq));

        while inner.map.len() > self.capacity {
            let Some((old, old_seq)) = inner.order.pop_front() else { break };
            if inner.map.get(&old).map(|e| e.seq) == Some(old_seq) {
                inner.map.remove(&old);
            }
        }
        if inner.order.len() > self.capacity * 2 {
            let Inner { map, order, .. } = &mut *inner;
            order.retain(|(k, s)| map.get(k).map(|e| e.seq) == Some(*s));
        }
    }

    /// Drop one entry.
    pub fn remove(&self, key: &K) {
        self.inner.lock().map.remove(key);
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Number of stored entries, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let cache = ExpiringCache::new(2, Duration::from_secs(60));
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(1, "a2");
        cache.insert(3, "c");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some("a2"));
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[test]
    fn entries_expire() {
        let cache = ExpiringCache::new(8, Duration::from_millis(20));
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties() {
        let cache = ExpiringCache::new(8, Duration::from_secs(1));
        cache.insert(1, 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
