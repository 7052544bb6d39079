//! Symmetric encryption and sealed payloads.
//!
//! Every symmetric operation is ChaCha20-Poly1305 with a random 12-byte
//! nonce prepended to the ciphertext. Sealed payloads add an ephemeral
//! X25519 public key in front so only the holder of the recipient's secret
//! can derive the key.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use strand_types::PublicKey;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::blake2b_256_multi;
use crate::{CryptoError, NodeKeys};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Bytes a sealed payload adds on top of the plaintext.
pub const SEAL_OVERHEAD: usize = 32 + NONCE_LEN + TAG_LEN;

const SESSION_CONTEXT: &[u8] = b"strand-session-v1";
const SEAL_CONTEXT: &[u8] = b"strand-seal-v1";

/// A 32-byte symmetric key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// A fresh random key, used for per-message envelope content.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

fn cipher(key: &[u8; 32]) -> Result<ChaCha20Poly1305, CryptoError> {
    ChaCha20Poly1305::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Encrypt `payload` under `key`. Output is `nonce || ciphertext || tag`.
pub fn encrypt(payload: &[u8], key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher(key.as_bytes())?
        .encrypt(&nonce, payload)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`encrypt`]. Fails on a wrong key or any modified byte.
pub fn decrypt(data: &[u8], key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let min = NONCE_LEN + TAG_LEN;
    if data.len() < min {
        return Err(CryptoError::Truncated {
            len: data.len(),
            min,
        });
    }
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);

    cipher(key.as_bytes())?
        .decrypt(&Nonce::from(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

/// Derive the session key both handshake sides agree on.
///
/// The public keys are sorted first so initiator and responder hash the
/// same input regardless of role.
pub fn derive_session_key(shared: &[u8; 32], a: &PublicKey, b: &PublicKey) -> SessionKey {
    let (lo, hi) = if a.as_bytes() <= b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    };
    SessionKey(blake2b_256_multi(&[
        shared,
        lo.as_bytes(),
        hi.as_bytes(),
        SESSION_CONTEXT,
    ]))
}

fn seal_key(shared: &[u8; 32], ephemeral: &PublicKey, recipient: &PublicKey) -> SessionKey {
    SessionKey(blake2b_256_multi(&[
        shared,
        ephemeral.as_bytes(),
        recipient.as_bytes(),
        SEAL_CONTEXT,
    ]))
}

/// Encrypt `plaintext` so only the owner of `recipient` can read it.
///
/// Layout: `ephemeral_pub (32) || nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let mut eph_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut eph_bytes);
    let ephemeral = StaticSecret::from(eph_bytes);
    eph_bytes.zeroize();

    let eph_pub = PublicKey(X25519Public::from(&ephemeral).to_bytes());
    let shared = ephemeral.diffie_hellman(&X25519Public::from(*recipient.as_bytes()));
    let key = seal_key(shared.as_bytes(), &eph_pub, recipient);

    let body = encrypt(plaintext, &key)?;
    let mut out = Vec::with_capacity(32 + body.len());
    out.extend_from_slice(eph_pub.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Open a payload produced by [`seal`] with the recipient's keys.
pub fn open(sealed: &[u8], keys: &NodeKeys) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::Truncated {
            len: sealed.len(),
            min: SEAL_OVERHEAD,
        });
    }
    let (eph, body) = sealed.split_at(32);
    let mut eph_bytes = [0u8; 32];
    eph_bytes.copy_from_slice(eph);
    let eph_pub = PublicKey(eph_bytes);

    let mut shared = keys.diffie_hellman(&eph_pub);
    let key = seal_key(&shared, &eph_pub, &keys.public());
    shared.zeroize();
    decrypt(body, &key)
}
