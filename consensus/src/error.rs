use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("quorum lost: {alive} alive, {threshold} required")]
    QuorumLost { alive: usize, threshold: usize },

    #[error("node {0} is marked dead")]
    NodeDead(String),

    #[error("node {0} is not tracked")]
    UnknownNode(String),

    #[error("validator {0} is not authorized")]
    UnauthorizedValidator(String),

    #[error("invalid proof: {0}")]
    InvalidProof(String),
}
