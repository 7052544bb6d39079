//! Rolling set of recently seen envelope hashes.
//!
//! Each envelope carries a Blake2b integrity hash; remembering the last few
//! thousand lets the receive loop hand every envelope to the inbound queue
//! exactly once, even when a peer retransmits it.

use std::collections::HashSet;
use std::collections::VecDeque;

/// Default capacity: the last 65 536 envelopes.
pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

/// Bounded insertion-ordered set; the oldest hash is forgotten first.
pub struct MessageDedup {
    capacity: usize,
    hashes: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

impl MessageDedup {
    /// Create a new dedup tracker with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            hashes: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// `true` if `hash` was seen before; otherwise records it.
    pub fn is_duplicate(&mut self, hash: &[u8; 32]) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.hashes.contains(hash) {
            return true;
        }
        if self.hashes.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.hashes.remove(&old);
            }
        }
        self.hashes.insert(*hash);
        self.order.push_back(*hash);
        false
    }

    /// Check an envelope by its hex integrity hash.
    pub fn is_duplicate_envelope(&mut self, envelope_hash: &str) -> bool {
        let key = Self::hash_message(envelope_hash.as_bytes());
        self.is_duplicate(&key)
    }

    /// Fixed-width key for arbitrary bytes.
    pub fn hash_message(data: &[u8]) -> [u8; 32] {
        strand_crypto::blake2b_256(data)
    }

    /// Number of tracked hashes.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the tracker is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
