//! Parse errors for the shared types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("invalid node state: {0}")]
    InvalidNodeState(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),
}
