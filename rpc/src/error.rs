//! RPC error types.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("block not found: {0}")]
    BlockNotFound(u64),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("node busy, retry later: {0}")]
    Busy(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] strand_crypto::CryptoError),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// JSON-RPC style error code.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) | Self::Crypto(_) => -32600,
            Self::UnknownMethod(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::BlockNotFound(_) => -32001,
            Self::Rejected(_) => -32002,
            Self::Busy(_) => -32003,
            Self::Tls(_) | Self::Server(_) | Self::Io(_) => -32603,
        }
    }

    pub fn to_object(&self) -> Value {
        json!({ "code": self.code(), "message": self.to_string() })
    }
}
