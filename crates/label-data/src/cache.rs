//! Bounded in-memory block cache owned by one resolver.
//!
//! The default policy clears the whole map once it grows past capacity;
//! `Lru` evicts single entries instead.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::types::CachedBlock;

/// Default number of blocks held before eviction kicks in.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 500;

/// How the cache makes room once it is over capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Drop every entry before the next write once `len > capacity`.
    #[default]
    Clear,
    /// Evict the least recently used entry.
    Lru,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clear" => Ok(Self::Clear),
            "lru" => Ok(Self::Lru),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

enum Entries {
    Clear(HashMap<u64, Arc<CachedBlock>>),
    Lru(LruCache<u64, Arc<CachedBlock>>),
}

pub struct BlockCache {
    entries: Entries,
    capacity: usize,
}

impl BlockCache {
    /// Creates an empty cache. A zero capacity is treated as one.
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let entries = match policy {
            EvictionPolicy::Clear => Entries::Clear(HashMap::new()),
            EvictionPolicy::Lru => Entries::Lru(LruCache::new(capacity)),
        };
        Self {
            entries,
            capacity: capacity.get(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BLOCK_CACHE_CAPACITY, EvictionPolicy::Clear)
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Clear(map) => map.len(),
            Entries::Lru(lru) => lru.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, block_number: u64) -> bool {
        match &self.entries {
            Entries::Clear(map) => map.contains_key(&block_number),
            Entries::Lru(lru) => lru.contains(&block_number),
        }
    }

    /// Looks up a block, refreshing its recency under `Lru`.
    pub fn get(&mut self, block_number: u64) -> Option<Arc<CachedBlock>> {
        match &mut self.entries {
            Entries::Clear(map) => map.get(&block_number).cloned(),
            Entries::Lru(lru) => lru.get(&block_number).cloned(),
        }
    }

    /// Inserts one block and returns the entry now held for that number.
    ///
    /// Existing entries are never replaced.
    pub fn insert(&mut self, block_number: u64, block: CachedBlock) -> Arc<CachedBlock> {
        self.make_room();
        self.put(block_number, Arc::new(block))
    }

    /// Inserts a batch of blocks, making room once before the batch.
    pub fn extend(&mut self, blocks: impl IntoIterator<Item = (u64, CachedBlock)>) {
        self.make_room();
        for (block_number, block) in blocks {
            self.put(block_number, Arc::new(block));
        }
    }

    pub fn clear(&mut self) {
        match &mut self.entries {
            Entries::Clear(map) => map.clear(),
            Entries::Lru(lru) => lru.clear(),
        }
    }

    /// Runs before every write. The clear policy empties the map only once it
    /// already holds more than `capacity` entries, so it peaks at
    /// `capacity + 1` and the write that triggers the clear is left alone.
    fn make_room(&mut self) {
        if let Entries::Clear(map) = &mut self.entries {
            if map.len() > self.capacity {
                tracing::debug!(entries = map.len(), "block cache over capacity, clearing");
                map.clear();
            }
        }
    }

    fn put(&mut self, block_number: u64, block: Arc<CachedBlock>) -> Arc<CachedBlock> {
        match &mut self.entries {
            Entries::Clear(map) => map.entry(block_number).or_insert(block).clone(),
            Entries::Lru(lru) => lru.get_or_insert(block_number, || block).clone(),
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(timestamp: u64) -> CachedBlock {
        CachedBlock {
            timestamp,
            transactions: Vec::new(),
        }
    }

    #[test]
    fn clear_policy_resets_after_capacity_is_exceeded() {
        let mut cache = BlockCache::with_defaults();
        for n in 0..=500 {
            cache.insert(n, block(n));
        }
        assert_eq!(cache.len(), 501);

        cache.insert(1_000, block(1_000));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1_000));
        assert!(!cache.contains(0));
    }

    #[test]
    fn entries_are_never_overwritten() {
        let mut cache = BlockCache::new(10, EvictionPolicy::Clear);
        cache.insert(7, block(100));
        let held = cache.insert(7, block(200));
        assert_eq!(held.timestamp, 100);
        assert_eq!(cache.get(7).map(|b| b.timestamp), Some(100));
    }

    #[test]
    fn extend_checks_capacity_once_per_batch() {
        let mut cache = BlockCache::new(3, EvictionPolicy::Clear);
        cache.extend((0..4).map(|n| (n, block(n))));
        assert_eq!(cache.len(), 4);

        cache.extend((10..12).map(|n| (n, block(n))));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(10) && cache.contains(11));
    }

    #[test]
    fn lru_policy_evicts_least_recent() {
        let mut cache = BlockCache::new(2, EvictionPolicy::Lru);
        cache.insert(1, block(1));
        cache.insert(2, block(2));
        assert!(cache.get(1).is_some());

        cache.insert(3, block(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn eviction_policy_parses() {
        assert_eq!("lru".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!("clear".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Clear));
        assert!("fifo".parse::<EvictionPolicy>().is_err());
    }
}
