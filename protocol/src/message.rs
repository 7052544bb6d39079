//! Application messages carried inside envelope content.

use serde::{Deserialize, Serialize};
use strand_crypto::integrity_hash;
use strand_types::{Block, ChainTip, Transaction};

/// Every message a peer can send after the session is established.
///
/// Request/response pairs share a `request_id` chosen by the requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Transaction(Transaction),
    Block(Block),
    ChainTipRequest { request_id: u64 },
    ChainTipResponse { request_id: u64, tip: Option<ChainTip> },
    ChainRequest { request_id: u64 },
    ChainResponse { request_id: u64, blocks: Vec<Block> },
    /// Sent after the local chain was replaced by a longer one.
    Reorg { tip: ChainTip },
    RouteTable(RouteTable),
    /// Opaque QoS-dispatched payload.
    Packet { priority: u8, data: Vec<u8> },
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::Block(_) => "block",
            Self::ChainTipRequest { .. } => "chain_tip_request",
            Self::ChainTipResponse { .. } => "chain_tip_response",
            Self::ChainRequest { .. } => "chain_request",
            Self::ChainResponse { .. } => "chain_response",
            Self::Reorg { .. } => "reorg",
            Self::RouteTable(_) => "route_table",
            Self::Packet { .. } => "packet",
        }
    }

    /// The correlation id when this message answers a request.
    pub fn response_id(&self) -> Option<u64> {
        match self {
            Self::ChainTipResponse { request_id, .. } | Self::ChainResponse { request_id, .. } => {
                Some(*request_id)
            }
            _ => None,
        }
    }
}

/// One row of a broadcast routing table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub peer_id: String,
    pub address: String,
}

/// A routing table snapshot with a hex Blake2b integrity hash over its rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub entries: Vec<RouteEntry>,
    pub integrity: String,
}

impl RouteTable {
    /// Build a table; rows are sorted by peer id so the hash is stable.
    pub fn new(mut entries: Vec<RouteEntry>) -> Self {
        entries.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        let integrity = Self::hash_entries(&entries);
        Self { entries, integrity }
    }

    fn hash_entries(entries: &[RouteEntry]) -> String {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(entries.len() * 2 + 1);
        parts.push(b"strand-routes");
        for entry in entries {
            parts.push(entry.peer_id.as_bytes());
            parts.push(entry.address.as_bytes());
        }
        // Row lengths keep field boundaries unambiguous.
        let lens: Vec<[u8; 8]> = entries
            .iter()
            .map(|e| {
                let mut l = [0u8; 8];
                l[..4].copy_from_slice(&(e.peer_id.len() as u32).to_be_bytes());
                l[4..].copy_from_slice(&(e.address.len() as u32).to_be_bytes());
                l
            })
            .collect();
        parts.extend(lens.iter().map(|l| l.as_slice()));
        integrity_hash(&parts)
    }

    pub fn verify(&self) -> bool {
        Self::hash_entries(&self.entries) == self.integrity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, addr: &str) -> RouteEntry {
        RouteEntry {
            peer_id: id.into(),
            address: addr.into(),
        }
    }

    #[test]
    fn route_table_hash_is_order_independent() {
        let a = RouteTable::new(vec![entry("a", "1.1.1.1:1"), entry("b", "2.2.2.2:2")]);
        let b = RouteTable::new(vec![entry("b", "2.2.2.2:2"), entry("a", "1.1.1.1:1")]);
        assert_eq!(a.integrity, b.integrity);
        assert!(a.verify());
    }

    #[test]
    fn tampered_route_table_fails_verification() {
        let mut t = RouteTable::new(vec![entry("a", "1.1.1.1:1")]);
        t.entries[0].address = "6.6.6.6:6".into();
        assert!(!t.verify());
    }

    #[test]
    fn row_boundaries_are_hashed() {
        let a = RouteTable::new(vec![entry("ab", "c")]);
        let b = RouteTable::new(vec![entry("a", "bc")]);
        assert_ne!(a.integrity, b.integrity);
    }

    #[test]
    fn response_ids() {
        assert_eq!(
            WireMessage::ChainResponse {
                request_id: 9,
                blocks: vec![]
            }
            .response_id(),
            Some(9)
        );
        assert_eq!(WireMessage::ChainRequest { request_id: 9 }.response_id(), None);
    }
}
