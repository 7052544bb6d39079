//! Genesis block creation: the first block on each network.
//!
//! Every node on a network must derive the same genesis block, so its
//! contents depend only on the network id and the configured allocations.

use strand_types::{Block, BlockHash, NetworkId, ProofKind, SubBlock, Timestamp, Transaction};

/// Sender of genesis allocations. Debits from it are not tracked.
pub const GENESIS_ACCOUNT: &str = "genesis";

pub struct GenesisConfig {
    pub network: NetworkId,
    /// Initial balances, credited by the genesis block.
    pub allocations: Vec<(String, u64)>,
}

impl GenesisConfig {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            allocations: Vec::new(),
        }
    }

    pub fn with_allocation(mut self, account: impl Into<String>, amount: u64) -> Self {
        self.allocations.push((account.into(), amount));
        self
    }
}

fn genesis_timestamp(network: &NetworkId) -> Timestamp {
    match network {
        NetworkId::Live => Timestamp::new(1_700_000_000),
        NetworkId::Test => Timestamp::new(1_690_000_000),
        NetworkId::Dev => Timestamp::EPOCH,
    }
}

/// Build the genesis block: index 0, zero previous hash, validated by the
/// network name, carrying one sub-block of allocation transfers.
pub fn create_genesis_block(config: &GenesisConfig) -> Block {
    let timestamp = genesis_timestamp(&config.network);
    let validator = format!("{}-{}", GENESIS_ACCOUNT, config.network.as_str());
    let transactions: Vec<Transaction> = config
        .allocations
        .iter()
        .enumerate()
        .map(|(nonce, (account, amount))| {
            Transaction::new(GENESIS_ACCOUNT, account.clone(), *amount, 0, nonce as u64, timestamp)
        })
        .collect();

    let sub_blocks = if transactions.is_empty() {
        Vec::new()
    } else {
        vec![SubBlock::new(0, transactions, ProofKind::Stake, timestamp)]
    };
    Block::new(0, BlockHash::ZERO, validator, sub_blocks, timestamp)
}

/// Genesis hash of a network with no allocations.
pub fn genesis_hash(network: NetworkId) -> BlockHash {
    create_genesis_block(&GenesisConfig::new(network)).hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        assert_eq!(genesis_hash(NetworkId::Dev), genesis_hash(NetworkId::Dev));
    }

    #[test]
    fn genesis_differs_per_network() {
        assert_ne!(genesis_hash(NetworkId::Live), genesis_hash(NetworkId::Test));
        assert_ne!(genesis_hash(NetworkId::Test), genesis_hash(NetworkId::Dev));
    }

    #[test]
    fn allocations_change_the_hash() {
        let funded = create_genesis_block(
            &GenesisConfig::new(NetworkId::Dev).with_allocation("alice", 1_000),
        );
        assert_ne!(funded.hash, genesis_hash(NetworkId::Dev));
        assert_eq!(funded.index, 0);
        assert!(funded.prev_hash.is_zero());
        assert_eq!(funded.transaction_count(), 1);
        assert!(funded.hash_is_valid());
    }
}
