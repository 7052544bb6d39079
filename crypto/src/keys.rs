//! X25519 node keys and the textual public key format.
//!
//! Public keys travel in the handshake as a three-line text block:
//!
//! ```text
//! -----BEGIN STRAND X25519 PUBLIC KEY-----
//! <base64 of the 32 raw bytes>
//! -----END STRAND X25519 PUBLIC KEY-----
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use strand_types::{PublicKey, SecretKey};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::CryptoError;

const BEGIN: &str = "-----BEGIN STRAND X25519 PUBLIC KEY-----";
const END: &str = "-----END STRAND X25519 PUBLIC KEY-----";

/// A node's long-lived X25519 key pair.
///
/// Not `Clone`: share it behind an `Arc`. The secret half is zeroized on drop.
pub struct NodeKeys {
    secret: SecretKey,
    public: PublicKey,
}

impl NodeKeys {
    /// Generate a fresh key pair from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self::from_secret(bytes)
    }

    /// Rebuild a key pair from stored secret bytes.
    pub fn from_secret(bytes: [u8; 32]) -> Self {
        let secret = SecretKey(bytes);
        let public = public_from_secret(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Raw X25519 shared secret with `peer`.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> [u8; 32] {
        let secret = StaticSecret::from(*self.secret.as_bytes());
        let shared = secret.diffie_hellman(&X25519Public::from(*peer.as_bytes()));
        *shared.as_bytes()
    }

    /// The public key in its textual form.
    pub fn public_text(&self) -> String {
        encode_public_key(&self.public)
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Derive the X25519 public key for a secret.
pub fn public_from_secret(secret: &SecretKey) -> PublicKey {
    let secret = StaticSecret::from(*secret.as_bytes());
    PublicKey(X25519Public::from(&secret).to_bytes())
}

/// Render a public key in the textual exchange format.
pub fn encode_public_key(key: &PublicKey) -> String {
    format!("{BEGIN}\n{}\n{END}\n", STANDARD.encode(key.as_bytes()))
}

/// Parse the textual exchange format. Surrounding whitespace is ignored.
pub fn decode_public_key(text: &str) -> Result<PublicKey, CryptoError> {
    let mut lines = text.trim().lines().map(str::trim);
    if lines.next() != Some(BEGIN) {
        return Err(CryptoError::KeyFormat("missing begin marker".into()));
    }
    let body = lines
        .next()
        .ok_or_else(|| CryptoError::KeyFormat("missing key body".into()))?;
    if lines.next() != Some(END) {
        return Err(CryptoError::KeyFormat("missing end marker".into()));
    }
    if lines.next().is_some() {
        return Err(CryptoError::KeyFormat("trailing data after end marker".into()));
    }

    let raw = STANDARD
        .decode(body)
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
    Ok(PublicKey(bytes))
}
