//! Ledger transaction payload.

use serde::{Deserialize, Serialize};

use crate::hash::digest_multi;
use crate::{Timestamp, TxHash};

/// A value transfer between two wallet addresses.
///
/// Opaque to the networking layer beyond its hash; flow control only moves
/// transactions between pools.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
    pub timestamp: Timestamp,
}

impl Transaction {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: u64,
        fee: u64,
        nonce: u64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            fee,
            nonce,
            timestamp,
        }
    }

    pub fn hash(&self) -> TxHash {
        let sender_len = (self.sender.len() as u32).to_be_bytes();
        let recipient_len = (self.recipient.len() as u32).to_be_bytes();
        TxHash::new(digest_multi(&[
            b"strand-tx",
            &sender_len,
            self.sender.as_bytes(),
            &recipient_len,
            self.recipient.as_bytes(),
            &self.amount.to_be_bytes(),
            &self.fee.to_be_bytes(),
            &self.nonce.to_be_bytes(),
            &self.timestamp.as_secs().to_be_bytes(),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_distinguishes_field_boundaries() {
        let a = Transaction::new("ab", "c", 1, 0, 0, Timestamp::new(1));
        let b = Transaction::new("a", "bc", 1, 0, 0, Timestamp::new(1));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn hash_covers_nonce() {
        let a = Transaction::new("a", "b", 1, 0, 0, Timestamp::new(1));
        let b = Transaction::new("a", "b", 1, 0, 1, Timestamp::new(1));
        assert_ne!(a.hash(), b.hash());
    }
}
