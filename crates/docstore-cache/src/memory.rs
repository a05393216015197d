//! In-process cache tier.
//!
//! Bounded FIFO: when full, the oldest-inserted entry is evicted no matter
//! how recently it was read. Expiry is fixed when an entry is inserted;
//! reads never extend it. Replacing a key counts as a fresh insertion.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

/// Result of an L1 lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    /// Entry was present but past its expiry; it has been removed
    Expired,
    Miss,
}

pub struct MemoryCache<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion order. Holds stale `(key, seq)` pairs for replaced or
    /// removed keys; they are skipped on eviction.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
    max_entries: usize,
    ttl: Duration,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn get(&mut self, key: &str) -> Lookup<V> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        if Instant::now() < entry.expires_at {
            return Lookup::Hit(entry.value.clone());
        }
        self.entries.remove(key);
        Lookup::Expired
    }

    /// Insert or replace. Returns how many entries were evicted to make room.
    pub fn insert(&mut self, key: String, value: V) -> usize {
        self.entries.remove(&key);

        let mut evicted = 0;
        while self.entries.len() >= self.max_entries {
            match self.order.pop_front() {
                Some((old_key, seq)) => {
                    if self.entries.get(&old_key).is_some_and(|e| e.seq == seq) {
                        self.entries.remove(&old_key);
                        evicted += 1;
                    }
                }
                None => break,
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
                seq,
            },
        );

        if self.order.len() > self.max_entries * 2 + 16 {
            self.compact();
        }
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop everything. Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.order.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize) -> MemoryCache<u32> {
        MemoryCache::new(max, Duration::from_secs(10))
    }

    #[test]
    fn test_fifo_eviction_ignores_reads() {
        let mut c = cache(2);
        c.insert("a".into(), 1);
        c.insert("b".into(), 2);
        assert_eq!(c.get("a"), Lookup::Hit(1));

        assert_eq!(c.insert("c".into(), 3), 1);
        assert_eq!(c.get("a"), Lookup::Miss);
        assert_eq!(c.get("b"), Lookup::Hit(2));
        assert_eq!(c.get("c"), Lookup::Hit(3));
    }

    #[test]
    fn test_replace_moves_to_back() {
        let mut c = cache(2);
        c.insert("a".into(), 1);
        c.insert("b".into(), 2);
        assert_eq!(c.insert("a".into(), 10), 0);
        assert_eq!(c.len(), 2);

        c.insert("c".into(), 3);
        assert_eq!(c.get("b"), Lookup::Miss);
        assert_eq!(c.get("a"), Lookup::Hit(10));
    }

    #[test]
    fn test_removed_keys_do_not_count_against_capacity() {
        let mut c = cache(2);
        c.insert("a".into(), 1);
        c.insert("b".into(), 2);
        assert!(c.remove("a"));
        assert!(!c.remove("a"));

        assert_eq!(c.insert("c".into(), 3), 0);
        assert_eq!(c.get("b"), Lookup::Hit(2));
    }

    #[test]
    fn test_order_queue_stays_bounded() {
        let mut c = cache(4);
        for i in 0..1_000u32 {
            c.insert("same".into(), i);
        }
        assert!(c.order.len() <= 4 * 2 + 16);
        assert_eq!(c.get("same"), Lookup::Hit(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fixed_at_insertion() {
        let mut c = cache(4);
        c.insert("a".into(), 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(c.get("a"), Lookup::Hit(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(c.get("a"), Lookup::Expired);
        assert_eq!(c.get("a"), Lookup::Miss);
        assert!(c.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut c = cache(4);
        c.insert("a".into(), 1);
        c.insert("b".into(), 2);
        assert_eq!(c.clear(), 2);
        assert!(c.is_empty());
    }
}
