//! Block hash type and the chain entities batched by flow control.
//!
//! The networking layer treats these as payloads with just enough structure
//! (index, previous hash, validator) to order them and detect forks.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::hash::{digest_multi, hex};
use crate::transaction::Transaction;
use crate::{Timestamp, TypeError};

/// A 32-byte block hash that identifies a block or sub-block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash([u8; 32]);

impl Default for BlockHash {
    fn default() -> Self {
        Self::ZERO
    }
}

impl BlockHash {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl FromStr for BlockHash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode_32(s)
            .map(Self)
            .ok_or_else(|| TypeError::InvalidHash(s.to_string()))
    }
}

// Hex on the wire so block JSON stays readable over RPC.
impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which proof family the consensus collaborator chose for a sub-block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofKind {
    Stake,
    History,
}

impl ProofKind {
    fn tag(self) -> u8 {
        match self {
            Self::Stake => 1,
            Self::History => 2,
        }
    }
}

/// An intermediate batch of transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlock {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub proof: ProofKind,
    pub timestamp: Timestamp,
    pub hash: BlockHash,
}

impl SubBlock {
    /// Build a sub-block and compute its hash.
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        proof: ProofKind,
        timestamp: Timestamp,
    ) -> Self {
        let mut sub = Self {
            index,
            transactions,
            proof,
            timestamp,
            hash: BlockHash::ZERO,
        };
        sub.hash = sub.compute_hash();
        sub
    }

    pub fn compute_hash(&self) -> BlockHash {
        let index = self.index.to_be_bytes();
        let ts = self.timestamp.as_secs().to_be_bytes();
        let tag = [self.proof.tag()];
        let tx_hashes: Vec<[u8; 32]> = self
            .transactions
            .iter()
            .map(|tx| *tx.hash().as_bytes())
            .collect();
        let mut parts: Vec<&[u8]> = vec![b"strand-subblock", &index, &tag, &ts];
        parts.extend(tx_hashes.iter().map(|h| h.as_slice()));
        BlockHash::new(digest_multi(&parts))
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// A finalized batch of sub-blocks, chained by `prev_hash`.
///
/// `prev_hash` must equal the hash of the block immediately preceding this
/// one in the accepted chain; a mismatch signals a fork.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub prev_hash: BlockHash,
    pub hash: BlockHash,
    pub timestamp: Timestamp,
    pub validator: String,
    pub sub_blocks: Vec<SubBlock>,
}

impl Block {
    /// Build a block and seal it with its computed hash.
    pub fn new(
        index: u64,
        prev_hash: BlockHash,
        validator: impl Into<String>,
        sub_blocks: Vec<SubBlock>,
        timestamp: Timestamp,
    ) -> Self {
        let mut block = Self {
            index,
            prev_hash,
            hash: BlockHash::ZERO,
            timestamp,
            validator: validator.into(),
            sub_blocks,
        };
        block.seal();
        block
    }

    /// The first block of a chain: index 0, zero previous hash, no payload.
    pub fn genesis(validator: impl Into<String>, timestamp: Timestamp) -> Self {
        Self::new(0, BlockHash::ZERO, validator, Vec::new(), timestamp)
    }

    pub fn compute_hash(&self) -> BlockHash {
        let index = self.index.to_be_bytes();
        let ts = self.timestamp.as_secs().to_be_bytes();
        let validator_len = (self.validator.len() as u32).to_be_bytes();
        let mut parts: Vec<&[u8]> = vec![
            b"strand-block",
            &index,
            self.prev_hash.as_bytes(),
            &ts,
            &validator_len,
            self.validator.as_bytes(),
        ];
        parts.extend(self.sub_blocks.iter().map(|s| s.hash.as_bytes().as_slice()));
        BlockHash::new(digest_multi(&parts))
    }

    /// Recompute and store the hash after the header changed.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Whether the stored hash matches the block contents.
    pub fn hash_is_valid(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn tip(&self) -> ChainTip {
        ChainTip {
            index: self.index,
            hash: self.hash,
        }
    }

    pub fn transaction_count(&self) -> usize {
        self.sub_blocks.iter().map(SubBlock::len).sum()
    }
}

/// The head of a chain as reported by a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainTip {
    pub index: u64,
    pub hash: BlockHash,
}
