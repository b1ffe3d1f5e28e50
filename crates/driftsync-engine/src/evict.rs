//! Bounded accumulation buffer with deterministic eviction.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Fixed-capacity map that evicts its least-recently-used entry through a
/// callback.
///
/// Every [`compute`](Self::compute) marks the entry most-recently used;
/// once an insert pushes the map past `max_size`, the single oldest entry
/// is removed and handed to `on_evict` synchronously on the caller's
/// thread. Not internally synchronized: callers needing concurrent access
/// must serialize externally.
pub struct EvictingMap<K, V> {
    max_size: usize,
    /// Monotonic access stamp; recency index below maps stamp -> key.
    tick: u64,
    entries: HashMap<K, (u64, V)>,
    recency: BTreeMap<u64, K>,
    on_evict: Box<dyn FnMut(K, V) + Send>,
}

impl<K: Eq + Hash + Clone, V> EvictingMap<K, V> {
    /// # Panics
    ///
    /// Panics if `max_size` is zero.
    pub fn new(max_size: usize, on_evict: impl FnMut(K, V) + Send + 'static) -> Self {
        assert!(max_size > 0, "EvictingMap requires max_size >= 1");
        Self {
            max_size,
            tick: 0,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            on_evict: Box::new(on_evict),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or update the entry for `key`, marking it most-recently used.
    ///
    /// `update` receives the current value (if any) and returns the new
    /// one. If the map then exceeds its capacity, the oldest entry is
    /// evicted through the callback before returning.
    pub fn compute(&mut self, key: K, update: impl FnOnce(Option<V>) -> V) {
        let previous = match self.entries.remove(&key) {
            Some((stamp, value)) => {
                self.recency.remove(&stamp);
                Some(value)
            }
            None => None,
        };
        let value = update(previous);

        self.tick += 1;
        let stamp = self.tick;
        self.entries.insert(key.clone(), (stamp, value));
        self.recency.insert(stamp, key);

        if self.entries.len() > self.max_size {
            self.evict_oldest();
        }
    }

    /// Drain every remaining entry through the eviction callback,
    /// oldest-first. Used for flush-on-shutdown.
    pub fn evict_all(&mut self) {
        while !self.entries.is_empty() {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        let Some((stamp, key)) = self.recency.pop_first() else {
            return;
        };
        debug_assert!(self.entries.contains_key(&key));
        if let Some((entry_stamp, value)) = self.entries.remove(&key) {
            debug_assert_eq!(entry_stamp, stamp);
            (self.on_evict)(key, value);
        }
    }
}
