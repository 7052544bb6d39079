use strand_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("dial {address} failed: {reason}")]
    Dial { address: String, reason: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection pool full ({0} connections)")]
    PoolFull(usize),

    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    #[error("peer {0} not found")]
    PeerNotFound(String),

    #[error("peer {0} is banned")]
    PeerBanned(String),

    #[error("no route to {0}")]
    NoRoute(String),

    #[error("peer {0} did not answer the liveness probe")]
    Unreachable(String),

    #[error("{0} queue is full")]
    QueueFull(&'static str),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] strand_crypto::CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Transport failures, as opposed to local policy or capacity errors.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::Timeout(_) | Self::ConnectionClosed(_) | Self::Io(_)
        )
    }
}
