use strand_types::BlockHash;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("chain is empty")]
    EmptyChain,

    #[error("block {index} does not start at genesis")]
    MissingGenesis { index: u64 },

    #[error("block {index} does not link to {expected}")]
    BrokenLink { index: u64, expected: BlockHash },

    #[error("block {index} has an invalid hash")]
    InvalidHash { index: u64 },

    #[error("expected block index {expected}, got {got}")]
    IndexMismatch { expected: u64, got: u64 },

    #[error("genesis {got} differs from local genesis {expected}")]
    GenesisMismatch { expected: BlockHash, got: BlockHash },

    #[error("chain walk exceeded {0} steps")]
    WalkLimit(usize),

    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),
}
