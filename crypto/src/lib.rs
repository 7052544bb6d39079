//! Cryptographic primitives for the strand node.
//!
//! - **X25519** for key agreement (handshake session keys, sealed payloads)
//! - **ChaCha20-Poly1305** AEAD for every symmetric encryption
//! - **Blake2b-256** for hashing and key derivation
//! - A textual public key format exchanged raw during the handshake

pub mod encryption;
pub mod error;
pub mod hash;
pub mod keys;

pub use encryption::{
    decrypt, derive_session_key, encrypt, open, seal, SessionKey, NONCE_LEN, SEAL_OVERHEAD,
    TAG_LEN,
};
pub use error::CryptoError;
pub use hash::{blake2b_256, blake2b_256_multi, integrity_hash};
pub use keys::{decode_public_key, encode_public_key, public_from_secret, NodeKeys};
