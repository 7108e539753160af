//! TTL + LRU memoization for expensive upstream queries
//!
//! Every billing and metrics call is a blocking network round trip, and
//! dashboards re-request the same ranges constantly. The cache bounds that:
//! a repeated call with the same key within the entry lifetime returns the
//! stored value without touching the upstream. Entries past their lifetime
//! are recomputed, and the map itself is capacity-bounded with
//! least-recently-used eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::Result;

/// Cache tuning. Lifetime and capacity are explicit configuration rather
/// than hidden constants.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// How long a stored value stays valid
    pub ttl: Duration,
    /// Maximum number of entries; a capacity of 0 disables caching
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 128,
        }
    }
}

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    /// Access order, least recently used at the front
    order: VecDeque<String>,
}

/// Memoizing wrapper keyed by caller-built strings encoding the operation
/// and its argument tuple.
///
/// Safe under concurrent callers: lookups and inserts are serialized behind
/// a mutex, but the lock is released while the compute closure runs, so a
/// slow upstream call never blocks unrelated cache traffic. Overlapping
/// callers may recompute the same key redundantly; the last write wins.
/// Errors from the closure are returned as-is and never cached.
pub struct TtlCache<T> {
    config: CacheConfig,
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Return the cached value for `key`, or run `compute`, store its
    /// successful result, and return it.
    pub fn get_or_insert_with<F>(&self, key: &str, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    fn get(&self, key: &str) -> Option<T> {
        let mut inner = self.lock();
        let fresh = match inner.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.config.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => return None,
        };
        match fresh {
            Some(value) => {
                touch(&mut inner.order, key);
                Some(value)
            }
            None => {
                // expired; drop so the caller recomputes and refreshes
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                None
            }
        }
    }

    fn insert(&self, key: &str, value: T) {
        if self.config.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        let entry = Entry {
            value,
            stored_at: Instant::now(),
        };
        if inner.entries.insert(key.to_string(), entry).is_some() {
            touch(&mut inner.order, key);
        } else {
            inner.order.push_back(key.to_string());
        }
        while inner.entries.len() > self.config.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        // a poisoned lock means a panic mid-update; the map holds only
        // clonable cached values, so recovering the guard is sound
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    order.retain(|k| k != key);
    order.push_back(key.to_string());
}
