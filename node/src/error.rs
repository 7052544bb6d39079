use strand_types::BlockHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger error: {0}")]
    Ledger(#[from] strand_ledger::LedgerError),

    #[error("network error: {0}")]
    Network(#[from] strand_network::NetworkError),

    #[error("consensus error: {0}")]
    Consensus(#[from] strand_consensus::ConsensusError),

    #[error("flow control error: {0}")]
    Flow(#[from] FlowError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("config error: {0}")]
    Config(String),

    #[error("node already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RPC server error: {0}")]
    Rpc(#[from] strand_rpc::RpcError),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}

/// Errors from moving work between the flow-control pools.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The pending pool is at capacity; the producer should retry later.
    #[error("pending pool full ({limit} transactions)")]
    Backpressure { limit: usize },

    #[error("no pending transactions")]
    EmptyPending,

    #[error("no pending sub-blocks")]
    EmptySubBlocks,

    #[error("consensus refused block: {0}")]
    Consensus(#[from] strand_consensus::ConsensusError),

    #[error("ledger refused block: {0}")]
    Ledger(#[from] strand_ledger::LedgerError),
}

/// Why a fork candidate was not adopted. None of these alter the local chain.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("candidate with {candidate} blocks is not longer than local chain of {local}")]
    ChainNotLonger { local: u64, candidate: u64 },

    #[error("no peer reported a longer chain")]
    NoLongerChain,

    #[error("block {0} already known")]
    KnownBlock(BlockHash),

    #[error("network error: {0}")]
    Network(#[from] strand_network::NetworkError),

    #[error("ledger error: {0}")]
    Ledger(#[from] strand_ledger::LedgerError),

    #[error("consensus error: {0}")]
    Consensus(#[from] strand_consensus::ConsensusError),

    #[error("unexpected response from {peer}: {kind}")]
    UnexpectedResponse { peer: String, kind: &'static str },
}
