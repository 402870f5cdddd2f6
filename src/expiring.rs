//! LRU map whose entries also expire after a TTL.
//! Not synchronized; owners wrap it in their own lock.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// What the TTL is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Fixed lifetime from insertion; hits do not extend it.
    SinceInsert,
    /// Idle timeout; every hit restarts the clock.
    SinceLastAccess,
}

/// Why a lookup found nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    Absent,
    /// The entry was stale and has been dropped.
    Expired,
}

struct Stamped<V> {
    value: V,
    stamp: Instant,
}

pub struct ExpiringLru<K: Hash + Eq, V> {
    entries: LruCache<K, Stamped<V>>,
    ttl: Duration,
    expiry: Expiry,
}

impl<K: Hash + Eq + Clone, V> ExpiringLru<K, V> {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize, ttl: Duration, expiry: Expiry) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            ttl,
            expiry,
        }
    }

    fn is_stale(&self, stamp: Instant) -> bool {
        stamp.elapsed() >= self.ttl
    }

    /// Live value for `key`, marking it most recently used. A stale entry is
    /// removed and reported as [`Miss::Expired`].
    pub fn get(&mut self, key: &K) -> Result<&mut V, Miss> {
        let stale = match self.entries.peek(key) {
            Some(entry) => self.is_stale(entry.stamp),
            None => return Err(Miss::Absent),
        };
        if stale {
            self.entries.pop(key);
            return Err(Miss::Expired);
        }
        let refresh = self.expiry == Expiry::SinceLastAccess;
        let entry = self.entries.get_mut(key).ok_or(Miss::Absent)?;
        if refresh {
            entry.stamp = Instant::now();
        }
        Ok(&mut entry.value)
    }

    /// Insert or replace. Returns the pair pushed out, which is the old
    /// value of `key` on replacement or the LRU entry when full.
    pub fn push(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.entries
            .push(
                key,
                Stamped {
                    value,
                    stamp: Instant::now(),
                },
            )
            .map(|(k, old)| (k, old.value))
    }

    pub fn pop(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|entry| entry.value)
    }

    /// Drop every stale entry and return their keys.
    pub fn remove_expired(&mut self) -> Vec<K> {
        let stale: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_stale(entry.stamp))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        stale
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_absent() {
        let mut map = ExpiringLru::new(4, Duration::from_secs(60), Expiry::SinceInsert);
        assert_eq!(map.get(&"a").err(), Some(Miss::Absent));
        map.push("a", 1);
        assert_eq!(map.get(&"a").copied(), Ok(1));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let mut map = ExpiringLru::new(4, Duration::ZERO, Expiry::SinceLastAccess);
        map.push("a", 1);
        assert_eq!(map.get(&"a").err(), Some(Miss::Expired));
        assert!(map.is_empty());
    }

    #[test]
    fn test_access_refreshes_idle_clock_only() {
        let ttl = Duration::from_millis(150);
        let mut idle = ExpiringLru::new(4, ttl, Expiry::SinceLastAccess);
        let mut fixed = ExpiringLru::new(4, ttl, Expiry::SinceInsert);
        idle.push("a", 1);
        fixed.push("a", 1);
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(50));
            assert!(idle.get(&"a").is_ok());
            let _ = fixed.get(&"a");
        }
        assert!(idle.contains(&"a"));
        assert_eq!(fixed.get(&"a").err(), Some(Miss::Absent));
    }

    #[test]
    fn test_lru_push_reports_eviction() {
        let mut map = ExpiringLru::new(2, Duration::from_secs(60), Expiry::SinceInsert);
        map.push("a", 1);
        map.push("b", 2);
        assert!(map.get(&"a").is_ok());
        assert_eq!(map.push("c", 3), Some(("b", 2)));
        assert_eq!(map.push("c", 4), Some(("c", 3)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_remove_expired_returns_keys() {
        let mut map = ExpiringLru::new(4, Duration::ZERO, Expiry::SinceInsert);
        map.push("a", 1);
        map.push("b", 2);
        let mut removed = map.remove_expired();
        removed.sort();
        assert_eq!(removed, vec!["a", "b"]);
        assert!(map.is_empty());
    }
}
