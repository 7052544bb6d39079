use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: authentication check failed")]
    Decrypt,

    #[error("ciphertext too short: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed public key text: {0}")]
    KeyFormat(String),
}
