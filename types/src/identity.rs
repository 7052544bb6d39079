//! Peer identity and the fixed-width key used for XOR distance.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::hash::{digest, hex};
use crate::PublicKey;

/// One logical peer across reconnects: an opaque identifier, the address it
/// listens on, and its public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: String,
    pub address: String,
    pub public_key: PublicKey,
}

impl PeerIdentity {
    pub fn new(id: impl Into<String>, address: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            public_key,
        }
    }

    /// The DHT key for this identity.
    pub fn key(&self) -> NodeKey {
        NodeKey::from_id(&self.id)
    }
}

/// 256-bit DHT key derived from an identity string.
///
/// Two keys are compared as big-endian unsigned integers, so the XOR of two
/// keys is the Kademlia distance between them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey([u8; 32]);

impl NodeKey {
    pub const BITS: usize = 256;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the key for an identity string (Blake2b-256 of its bytes).
    pub fn from_id(id: &str) -> Self {
        Self(digest(id.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bitwise XOR distance to `other`.
    pub fn xor_distance(&self, other: &NodeKey) -> NodeKey {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        NodeKey(out)
    }

    /// Length of the common bit prefix with `other` (256 when equal).
    pub fn common_prefix_len(&self, other: &NodeKey) -> usize {
        let dist = self.xor_distance(other);
        for (byte_idx, byte) in dist.0.iter().enumerate() {
            if *byte != 0 {
                return byte_idx * 8 + byte.leading_zeros() as usize;
            }
        }
        Self::BITS
    }

    /// Bucket holding `other` in a table centred on `self`: the common
    /// prefix length, or `None` for the key itself.
    pub fn bucket_index(&self, other: &NodeKey) -> Option<usize> {
        match self.common_prefix_len(other) {
            Self::BITS => None,
            n => Some(n),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Compare two distances as fixed-width integers.
    pub fn cmp_distance(a: &NodeKey, b: &NodeKey) -> Ordering {
        a.0.cmp(&b.0)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}
