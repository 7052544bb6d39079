//! Fork cache: memory of fork blocks already seen.
//!
//! When a block arrives whose `prev_hash` is not our tip, it is cached under
//! that `prev_hash` (its root) so the same competing block does not trigger
//! fork resolution twice.

use std::collections::{HashMap, VecDeque};

use strand_types::BlockHash;

/// Maximum fork blocks held across all roots.
const MAX_ENTRIES: usize = 16_384;
/// Maximum forks tracked per root.
const MAX_FORKS_PER_ROOT: usize = 10;

/// Caches fork block hashes keyed by the `prev_hash` they build on.
pub struct ForkCache {
    entries: HashMap<BlockHash, Vec<BlockHash>>,
    total_count: usize,
    /// FIFO order for eviction. Roots removed mid-queue stay behind as
    /// tombstones and are skipped during eviction.
    insertion_order: VecDeque<BlockHash>,
}

impl ForkCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_count: 0,
            insertion_order: VecDeque::new(),
        }
    }

    /// Cache a fork block. Returns `true` if it was not already known.
    ///
    /// A root that already holds [`MAX_FORKS_PER_ROOT`] forks drops its
    /// oldest one to make room, so every hash reported as new is remembered.
    pub fn insert(&mut self, root: BlockHash, fork_hash: BlockHash) -> bool {
        if self.contains(&root, &fork_hash) {
            return false;
        }
        while self.total_count >= MAX_ENTRIES {
            self.evict_oldest();
        }

        let is_new_root = !self.entries.contains_key(&root);
        let forks = self.entries.entry(root).or_default();
        if is_new_root {
            self.insertion_order.push_back(root);
        }
        if forks.len() >= MAX_FORKS_PER_ROOT {
            forks.remove(0);
            self.total_count -= 1;
        }
        forks.push(fork_hash);
        self.total_count += 1;
        true
    }

    pub fn contains(&self, root: &BlockHash, fork_hash: &BlockHash) -> bool {
        self.entries
            .get(root)
            .is_some_and(|forks| forks.contains(fork_hash))
    }

    pub fn get_forks(&self, root: &BlockHash) -> Option<&[BlockHash]> {
        self.entries.get(root).map(|v| v.as_slice())
    }

    /// Forget a root and all its forks.
    pub fn remove(&mut self, root: &BlockHash) {
        if let Some(forks) = self.entries.remove(root) {
            self.total_count = self.total_count.saturating_sub(forks.len());
        }
    }

    /// Drop everything, e.g. after the chain was replaced.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        self.total_count = 0;
    }

    fn evict_oldest(&mut self) {
        while let Some(oldest) = self.insertion_order.pop_front() {
            if self.entries.contains_key(&oldest) {
                self.remove(&oldest);
                return;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.total_count
    }

    pub fn root_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

impl Default for ForkCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u16) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[..2].copy_from_slice(&n.to_be_bytes());
        BlockHash::new(bytes)
    }

    #[test]
    fn competing_blocks_share_a_root() {
        let mut cache = ForkCache::new();
        assert!(cache.insert(hash(1), hash(10)));
        assert!(cache.insert(hash(1), hash(11)));
        assert!(!cache.insert(hash(1), hash(10)));

        assert_eq!(cache.get_forks(&hash(1)), Some(&[hash(10), hash(11)][..]));
        assert_eq!((cache.len(), cache.root_count()), (2, 1));
        assert!(cache.contains(&hash(1), &hash(11)));
        assert!(cache.get_forks(&hash(2)).is_none());
    }

    #[test]
    fn per_root_cap_bounds_memory() {
        let mut cache = ForkCache::new();
        for i in 0..15 {
            cache.insert(hash(1), hash(100 + i));
        }
        assert_eq!(cache.len(), MAX_FORKS_PER_ROOT);
    }

    #[test]
    fn full_root_still_remembers_new_forks() {
        let mut cache = ForkCache::new();
        for i in 0..MAX_FORKS_PER_ROOT as u16 {
            assert!(cache.insert(hash(1), hash(100 + i)));
        }
        let late = hash(500);
        assert!(cache.insert(hash(1), late));
        assert!(!cache.insert(hash(1), late));
        assert!(cache.contains(&hash(1), &late));
        assert!(!cache.contains(&hash(1), &hash(100)));
        assert_eq!(cache.len(), MAX_FORKS_PER_ROOT);
    }

    #[test]
    fn remove_and_clear() {
        let mut cache = ForkCache::new();
        cache.insert(hash(1), hash(10));
        cache.insert(hash(2), hash(20));
        cache.remove(&hash(1));
        cache.remove(&hash(99));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.root_count(), 0);
    }

    #[test]
    fn eviction_takes_oldest_live_root() {
        let mut cache = ForkCache::new();
        cache.insert(hash(1), hash(10));
        cache.insert(hash(2), hash(20));
        cache.insert(hash(3), hash(30));
        cache.remove(&hash(1));

        cache.evict_oldest();
        assert!(cache.get_forks(&hash(2)).is_none());
        assert!(cache.get_forks(&hash(3)).is_some());
    }
}
