//! The message-layer envelope.
//!
//! JSON shape:
//! `{sender, recipient, encryptedKey, content, timestamp, hash}` where
//! `encryptedKey` and `content` are base64 and `timestamp` is RFC 3339.
//! The content is encrypted with a fresh per-message key; that key is sealed
//! to the recipient's public key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use strand_crypto::{integrity_hash, NodeKeys, SessionKey};
use strand_types::{PeerIdentity, Timestamp};
use strand_utils::{from_rfc3339, to_rfc3339};

use crate::codec::{decode_message, encode_message};
use crate::{ProtocolError, WireMessage};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
    pub encrypted_key: String,
    pub content: String,
    pub timestamp: String,
    pub hash: String,
}

impl Envelope {
    /// Encrypt `message` for `recipient`.
    pub fn seal(
        sender: &str,
        recipient: &PeerIdentity,
        message: &WireMessage,
        now: Timestamp,
    ) -> Result<Self, ProtocolError> {
        let content_key = SessionKey::random();
        let plaintext = encode_message(message)?;
        let content = strand_crypto::encrypt(&plaintext, &content_key)?;
        let encrypted_key = strand_crypto::seal(content_key.as_bytes(), &recipient.public_key)?;

        let mut envelope = Self {
            sender: sender.to_string(),
            recipient: recipient.id.clone(),
            encrypted_key: STANDARD.encode(encrypted_key),
            content: STANDARD.encode(content),
            timestamp: to_rfc3339(now),
            hash: String::new(),
        };
        envelope.hash = envelope.compute_hash();
        Ok(envelope)
    }

    /// Hex Blake2b-256 over every other field.
    pub fn compute_hash(&self) -> String {
        let fields = [
            self.sender.as_bytes(),
            self.recipient.as_bytes(),
            self.encrypted_key.as_bytes(),
            self.content.as_bytes(),
            self.timestamp.as_bytes(),
        ];
        let lens: Vec<[u8; 4]> = fields
            .iter()
            .map(|f| (f.len() as u32).to_be_bytes())
            .collect();
        let mut parts: Vec<&[u8]> = vec![b"strand-envelope"];
        for (field, len) in fields.iter().zip(&lens) {
            parts.push(len);
            parts.push(field);
        }
        integrity_hash(&parts)
    }

    pub fn verify_integrity(&self) -> Result<(), ProtocolError> {
        if self.compute_hash() == self.hash {
            Ok(())
        } else {
            Err(ProtocolError::Integrity(format!(
                "envelope from {} hash mismatch",
                self.sender
            )))
        }
    }

    /// Verify, unseal the content key and decrypt the message.
    pub fn open(&self, keys: &NodeKeys) -> Result<WireMessage, ProtocolError> {
        self.verify_integrity()?;
        let sealed_key = STANDARD
            .decode(&self.encrypted_key)
            .map_err(|e| ProtocolError::Malformed(format!("encryptedKey: {e}")))?;
        let content = STANDARD
            .decode(&self.content)
            .map_err(|e| ProtocolError::Malformed(format!("content: {e}")))?;

        let key_bytes = strand_crypto::open(&sealed_key, keys)?;
        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| ProtocolError::Malformed("content key is not 32 bytes".into()))?;
        let plaintext = strand_crypto::decrypt(&content, &SessionKey::new(key))?;
        decode_message(&plaintext)
    }

    pub fn sent_at(&self) -> Option<Timestamp> {
        from_rfc3339(&self.timestamp)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_types::Transaction;

    fn identity(keys: &NodeKeys, id: &str) -> PeerIdentity {
        PeerIdentity::new(id, "127.0.0.1:7300", keys.public())
    }

    fn sample() -> WireMessage {
        WireMessage::Transaction(Transaction::new("a", "b", 5, 1, 0, Timestamp::new(10)))
    }

    fn sealed_for(keys: &NodeKeys, at: u64) -> Envelope {
        Envelope::seal("alice", &identity(keys, "bob"), &sample(), Timestamp::new(at)).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let bob = NodeKeys::generate();
        let env = sealed_for(&bob, 1_700_000_000);
        assert_eq!(env.recipient, "bob");
        assert_eq!(env.sent_at(), Some(Timestamp::new(1_700_000_000)));
        assert_eq!(env.open(&bob).unwrap(), sample());
    }

    #[test]
    fn json_uses_camel_case_key_field() {
        let bob = NodeKeys::generate();
        let env = sealed_for(&bob, 1);
        let json = env.to_json().unwrap();
        assert!(json.contains("\"encryptedKey\""));
        assert_eq!(Envelope::from_json(json.as_bytes()).unwrap(), env);
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let bob = NodeKeys::generate();
        let eve = NodeKeys::generate();
        let env = sealed_for(&bob, 1);
        assert!(matches!(env.open(&eve), Err(ProtocolError::Crypto(_))));
    }

    #[test]
    fn tampered_field_fails_integrity_before_decrypt() {
        let bob = NodeKeys::generate();
        let mut env = sealed_for(&bob, 1);
        env.sender = "mallory".into();
        assert!(matches!(env.open(&bob), Err(ProtocolError::Integrity(_))));
    }
}
