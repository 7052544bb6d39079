//! Nullable randomness: node keys and identities from a seed.

use std::sync::atomic::{AtomicU64, Ordering};

use strand_crypto::NodeKeys;
use strand_types::{digest_multi, PeerIdentity};

/// Produces a reproducible sequence of 32-byte values and the keys built
/// from them. Two instances with the same seed yield the same sequence.
#[derive(Debug)]
pub struct NullRandom {
    seed: u64,
    counter: AtomicU64,
}

impl NullRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_bytes(&self) -> [u8; 32] {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        digest_multi(&[b"null-random", &self.seed.to_be_bytes(), &n.to_be_bytes()])
    }

    pub fn node_keys(&self) -> NodeKeys {
        NodeKeys::from_secret(self.next_bytes())
    }

    /// Fresh keys plus an identity carrying their public half.
    pub fn identity(&self, id: &str, address: &str) -> (NodeKeys, PeerIdentity) {
        let keys = self.node_keys();
        let identity = PeerIdentity::new(id, address, keys.public());
        (keys, identity)
    }
}
