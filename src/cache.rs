//! Bounded LRU cache of assembled objects
//!
//! Entries live in a `HashMap` keyed by object name; recency is kept in a
//! `BTreeMap` from a monotonically increasing access tick to the name. The
//! least-recently-used entry is therefore the first key of the tree, which
//! gives O(log n) get/put/evict without scanning.
//!
//! Every operation takes the same internal mutex, so the entry map, the
//! recency index and the counters always agree with each other.

use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug)]
struct CacheEntry {
    content: Bytes,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    sweep_count: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, name: &str) -> Option<Bytes> {
        let tick = self.bump();
        let entry = self.entries.get_mut(name)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, name.to_string());
        Some(entry.content.clone())
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, name) = self.recency.pop_first()?;
        self.entries.remove(&name);
        self.eviction_count += 1;
        Some(name)
    }
}

/// Cache statistics - snapshot of cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub item_count: usize,
    pub capacity: usize,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub sweep_count: u64,
}

impl CacheStats {
    /// Hit rate as percentage (0-100)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            (self.hit_count as f64 / total as f64) * 100.0
        }
    }
}

/// Fixed-capacity, recency-ordered map from object name to content
#[derive(Debug)]
pub struct BoundedCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl BoundedCache {
    /// Create a cache holding at most `capacity` objects (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the state half-updated in
    // a way later callers care about, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up `name`, marking it most-recently-used on a hit
    pub fn get(&self, name: &str) -> Option<Bytes> {
        let mut state = self.lock();
        match state.touch(name) {
            Some(content) => {
                state.hit_count += 1;
                debug!(name = %name, "Cache hit");
                Some(content)
            }
            None => {
                state.miss_count += 1;
                debug!(name = %name, "Cache miss");
                None
            }
        }
    }

    /// Whether `name` is cached. Does not count as an access.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    /// Insert or replace `name`, marking it most-recently-used.
    ///
    /// Returns the name evicted to make room, if any.
    pub fn put(&self, name: &str, content: Bytes) -> Option<String> {
        let mut state = self.lock();
        let tick = state.bump();

        if let Some(previous) = state.entries.insert(
            name.to_string(),
            CacheEntry { content, tick },
        ) {
            state.recency.remove(&previous.tick);
        }
        state.recency.insert(tick, name.to_string());

        if state.entries.len() > self.capacity {
            let evicted = state.evict_lru();
            if let Some(ref evicted) = evicted {
                debug!(name = %evicted, "Evicted least-recently-used entry");
            }
            evicted
        } else {
            None
        }
    }

    /// Drop `name` if present
    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.lock();
        match state.entries.remove(name) {
            Some(entry) => {
                state.recency.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    /// Empty the cache. Returns how many entries were dropped.
    pub fn clear_all(&self) -> usize {
        let mut state = self.lock();
        let cleared = state.entries.len();
        state.entries.clear();
        state.recency.clear();
        state.sweep_count += 1;
        cleared
    }

    /// Cached names, least-recently-used first
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().recency.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            item_count: state.entries.len(),
            capacity: self.capacity,
            total_size_bytes: state
                .entries
                .values()
                .map(|entry| entry.content.len() as u64)
                .sum(),
            hit_count: state.hit_count,
            miss_count: state.miss_count,
            eviction_count: state.eviction_count,
            sweep_count: state.sweep_count,
        }
    }
}
