//! In-memory ledger.
//!
//! The chain lives behind an `Arc<Vec<Block>>` so readers take cheap
//! snapshots. Appends copy-on-write only while a snapshot is outstanding;
//! replacement builds the new state off-lock and swaps it in one write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use strand_types::{Block, BlockHash, ChainTip, SubBlock};

use crate::chain::validate_links;
use crate::genesis::{create_genesis_block, GenesisConfig, GENESIS_ACCOUNT};
use crate::ledger::Ledger;
use crate::LedgerError;

#[derive(Clone)]
struct ChainState {
    blocks: Arc<Vec<Block>>,
    by_hash: HashMap<BlockHash, usize>,
    balances: HashMap<String, u64>,
}

impl ChainState {
    fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut state = Self {
            blocks: Arc::new(Vec::with_capacity(blocks.len())),
            by_hash: HashMap::with_capacity(blocks.len()),
            balances: HashMap::new(),
        };
        for block in blocks {
            state.push(block);
        }
        state
    }

    fn tip(&self) -> &Block {
        // Never empty: every state is built from at least a genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    fn push(&mut self, block: Block) {
        for tx in block.sub_blocks.iter().flat_map(|s| s.transactions.iter()) {
            if tx.sender != GENESIS_ACCOUNT {
                let debit = tx.amount.saturating_add(tx.fee);
                let balance = self.balances.entry(tx.sender.clone()).or_insert(0);
                *balance = balance.saturating_sub(debit);
            }
            let balance = self.balances.entry(tx.recipient.clone()).or_insert(0);
            *balance = balance.saturating_add(tx.amount);
        }
        self.by_hash.insert(block.hash, self.blocks.len());
        Arc::make_mut(&mut self.blocks).push(block);
    }
}

pub struct MemoryLedger {
    state: RwLock<ChainState>,
    staged: Mutex<Vec<SubBlock>>,
}

impl MemoryLedger {
    pub fn new(genesis: Block) -> Self {
        Self {
            state: RwLock::new(ChainState::from_blocks(vec![genesis])),
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &GenesisConfig) -> Self {
        Self::new(create_genesis_block(config))
    }

    /// Sub-blocks recorded but not yet part of a finalized block.
    pub fn staged_sub_blocks(&self) -> Vec<SubBlock> {
        self.staged.lock().clone()
    }

    fn unstage(&self, blocks: &[Block]) {
        let included: HashSet<BlockHash> = blocks
            .iter()
            .flat_map(|b| b.sub_blocks.iter().map(|s| s.hash))
            .collect();
        if !included.is_empty() {
            self.staged.lock().retain(|s| !included.contains(&s.hash));
        }
    }
}

impl Ledger for MemoryLedger {
    fn latest_block(&self) -> Block {
        self.state.read().tip().clone()
    }

    fn block_by_hash(&self, hash: &BlockHash) -> Option<Block> {
        let state = self.state.read();
        state.by_hash.get(hash).map(|&i| state.blocks[i].clone())
    }

    fn block_by_index(&self, index: u64) -> Option<Block> {
        self.state.read().blocks.get(index as usize).cloned()
    }

    fn height(&self) -> u64 {
        self.state.read().blocks.len() as u64
    }

    fn chain(&self) -> Arc<Vec<Block>> {
        Arc::clone(&self.state.read().blocks)
    }

    fn add_sub_block(&self, sub_block: SubBlock) -> Result<(), LedgerError> {
        tracing::trace!(index = sub_block.index, txs = sub_block.len(), "sub-block staged");
        self.staged.lock().push(sub_block);
        Ok(())
    }

    fn finalize_block(&self, block: Block) -> Result<ChainTip, LedgerError> {
        if !block.hash_is_valid() {
            return Err(LedgerError::InvalidHash { index: block.index });
        }
        let tip = {
            let mut state = self.state.write();
            let expected = state.blocks.len() as u64;
            if block.index != expected {
                return Err(LedgerError::IndexMismatch {
                    expected,
                    got: block.index,
                });
            }
            let current = state.tip().hash;
            if block.prev_hash != current {
                return Err(LedgerError::BrokenLink {
                    index: block.index,
                    expected: current,
                });
            }
            let tip = block.tip();
            state.push(block);
            tip
        };
        if let Some(block) = self.block_by_hash(&tip.hash) {
            self.unstage(std::slice::from_ref(&block));
        }
        tracing::debug!(index = tip.index, hash = %tip.hash, "block finalized");
        Ok(tip)
    }

    fn replace_chain(&self, blocks: Vec<Block>) -> Result<(), LedgerError> {
        validate_links(&blocks)?;
        let local_genesis = self.state.read().blocks[0].hash;
        let candidate_genesis = blocks[0].hash;
        if candidate_genesis != local_genesis {
            return Err(LedgerError::GenesisMismatch {
                expected: local_genesis,
                got: candidate_genesis,
            });
        }

        let next = ChainState::from_blocks(blocks);
        let new_tip = next.tip().tip();
        let snapshot = Arc::clone(&next.blocks);
        *self.state.write() = next;
        self.unstage(&snapshot);
        tracing::info!(index = new_tip.index, hash = %new_tip.hash, "chain replaced");
        Ok(())
    }

    fn balance(&self, address: &str) -> u64 {
        self.state.read().balances.get(address).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_types::{NetworkId, ProofKind, Timestamp, Transaction};

    fn ledger() -> MemoryLedger {
        MemoryLedger::from_config(
            &GenesisConfig::new(NetworkId::Dev).with_allocation("alice", 1_000),
        )
    }

    fn next_block(ledger: &MemoryLedger, txs: Vec<Transaction>) -> Block {
        let tip = ledger.latest_block();
        let sub = SubBlock::new(0, txs, ProofKind::Stake, Timestamp::new(tip.index + 1));
        Block::new(tip.index + 1, tip.hash, "v", vec![sub], Timestamp::new(tip.index + 1))
    }

    #[test]
    fn starts_at_genesis() {
        let l = ledger();
        assert_eq!(l.height(), 1);
        assert_eq!(l.latest_block().index, 0);
        assert_eq!(l.balance("alice"), 1_000);
        assert_eq!(l.balance("nobody"), 0);
    }

    #[test]
    fn finalize_extends_tip_and_moves_balances() {
        let l = ledger();
        let tx = Transaction::new("alice", "bob", 300, 5, 0, Timestamp::new(1));
        let block = next_block(&l, vec![tx]);
        let tip = l.finalize_block(block.clone()).unwrap();

        assert_eq!(tip, block.tip());
        assert_eq!(l.height(), 2);
        assert_eq!(l.balance("alice"), 695);
        assert_eq!(l.balance("bob"), 300);
        assert_eq!(l.block_by_hash(&block.hash), Some(block.clone()));
        assert_eq!(l.block_by_index(1), Some(block));
    }

    #[test]
    fn finalize_rejects_non_extending_blocks() {
        let l = ledger();
        let genesis = l.latest_block();
        let wrong_index = Block::new(5, genesis.hash, "v", vec![], Timestamp::new(1));
        assert!(matches!(
            l.finalize_block(wrong_index),
            Err(LedgerError::IndexMismatch { expected: 1, got: 5 })
        ));

        let wrong_prev = Block::new(1, BlockHash::new([3; 32]), "v", vec![], Timestamp::new(1));
        assert!(matches!(
            l.finalize_block(wrong_prev),
            Err(LedgerError::BrokenLink { index: 1, .. })
        ));

        let mut tampered = next_block(&l, vec![]);
        tampered.validator = "x".into();
        assert!(l.finalize_block(tampered).is_err());
        assert_eq!(l.height(), 1);
    }

    #[test]
    fn snapshot_survives_append() {
        let l = ledger();
        let before = l.chain();
        l.finalize_block(next_block(&l, vec![])).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(l.chain().len(), 2);
    }

    #[test]
    fn replace_swaps_whole_chain() {
        let l = ledger();
        l.finalize_block(next_block(&l, vec![])).unwrap();

        let other = ledger();
        for _ in 0..3 {
            let tx = Transaction::new("alice", "carol", 10, 0, 0, Timestamp::new(2));
            other.finalize_block(next_block(&other, vec![tx])).unwrap();
        }
        l.replace_chain(other.chain().to_vec()).unwrap();
        assert_eq!(l.height(), 4);
        assert_eq!(l.tip(), other.tip());
        assert_eq!(l.balance("carol"), 30);
    }

    #[test]
    fn replace_rejects_foreign_genesis_and_broken_chains() {
        let l = ledger();
        let foreign = MemoryLedger::from_config(&GenesisConfig::new(NetworkId::Test));
        assert!(matches!(
            l.replace_chain(foreign.chain().to_vec()),
            Err(LedgerError::GenesisMismatch { .. })
        ));
        assert_eq!(l.replace_chain(Vec::new()), Err(LedgerError::EmptyChain));
    }

    #[test]
    fn finalizing_unstages_included_sub_blocks() {
        let l = ledger();
        let block = next_block(&l, vec![Transaction::new("alice", "bob", 1, 0, 0, Timestamp::new(1))]);
        l.add_sub_block(block.sub_blocks[0].clone()).unwrap();
        let unrelated = SubBlock::new(9, vec![], ProofKind::History, Timestamp::new(9));
        l.add_sub_block(unrelated.clone()).unwrap();

        l.finalize_block(block).unwrap();
        assert_eq!(l.staged_sub_blocks(), vec![unrelated]);
    }

    #[test]
    fn summary_counts_transactions() {
        let l = ledger();
        let tx = Transaction::new("alice", "bob", 1, 0, 0, Timestamp::new(1));
        l.finalize_block(next_block(&l, vec![tx.clone(), tx])).unwrap();
        let s = l.summary();
        assert_eq!((s.blocks, s.transactions), (2, 3));
        assert_eq!(s.tip, Some(l.tip()));
    }
}
