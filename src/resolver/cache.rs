//! Bounded least-recently-used map for images that are no longer mapped.
//!
//! Recency is set on insert; entries leave by `remove` or eviction.

use std::collections::HashMap;
use std::hash::Hash;

pub(crate) struct LruCache<K, V> {
    cap: usize,
    tick: u64,
    map: HashMap<K, (V, u64)>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap,
            tick: 0,
            map: HashMap::with_capacity(cap.min(1024)),
        }
    }

    /// Insert, evicting the least recently used entry when full
    ///
    /// Returns the evicted key. A zero-capacity cache stores nothing.
    pub(crate) fn put(&mut self, k: K, v: V) -> Option<K> {
        if self.cap == 0 {
            return None;
        }
        self.tick = self.tick.wrapping_add(1);
        let mut evicted = None;
        if self.map.len() >= self.cap && !self.map.contains_key(&k) {
            // Evict least-recently-used (min tick)
            if let Some(old_k) = self
                .map
                .iter()
                .min_by_key(|(_, (_, t))| *t)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&old_k);
                evicted = Some(old_k);
            }
        }
        self.map.insert(k, (v, self.tick));
        evicted
    }

    pub(crate) fn remove(&mut self, k: &K) -> Option<V> {
        self.map.remove(k).map(|(v, _)| v)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.tick = 0;
    }
}
