use strand_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
