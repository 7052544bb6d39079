//! The ledger surface consumed by flow control, the coordinator and RPC.

use std::sync::Arc;

use strand_types::{Block, BlockHash, ChainTip, SubBlock};

use crate::LedgerError;

/// Read, append and replace entry points over the accepted chain.
///
/// Implementations must make [`replace_chain`](Ledger::replace_chain)
/// atomic: a reader sees either the old chain or the new one, never a mix.
pub trait Ledger: Send + Sync {
    /// The current tip. A ledger always holds at least its genesis block.
    fn latest_block(&self) -> Block;

    fn block_by_hash(&self, hash: &BlockHash) -> Option<Block>;

    fn block_by_index(&self, index: u64) -> Option<Block>;

    /// Number of blocks in the accepted chain, genesis included. This is
    /// also the index the next block will carry.
    fn height(&self) -> u64;

    /// Consistent snapshot of the whole chain.
    fn chain(&self) -> Arc<Vec<Block>>;

    /// Record a sub-block awaiting finalization.
    fn add_sub_block(&self, sub_block: SubBlock) -> Result<(), LedgerError>;

    /// Append a block that extends the current tip.
    fn finalize_block(&self, block: Block) -> Result<ChainTip, LedgerError>;

    /// Swap in a validated chain that shares our genesis.
    fn replace_chain(&self, blocks: Vec<Block>) -> Result<(), LedgerError>;

    /// Balance of `address` after every finalized transaction.
    fn balance(&self, address: &str) -> u64;

    fn tip(&self) -> ChainTip {
        self.latest_block().tip()
    }

    fn summary(&self) -> LedgerSummary {
        let chain = self.chain();
        LedgerSummary {
            blocks: chain.len() as u64,
            transactions: chain.iter().map(|b| b.transaction_count() as u64).sum(),
            tip: chain.last().map(Block::tip),
        }
    }
}

/// Summary statistics for the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSummary {
    pub blocks: u64,
    pub transactions: u64,
    pub tip: Option<ChainTip>,
}
