//! Fundamental types for the strand node.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! peer identities and DHT keys, block/transaction hashes, the chain entities the
//! networking layer batches and propagates, node classification enums, timestamps,
//! and the audit-event interface.

pub mod audit;
pub mod block;
pub mod error;
pub mod hash;
pub mod identity;
pub mod keys;
pub mod network;
pub mod state;
pub mod time;
pub mod transaction;

pub use audit::{AuditEvent, AuditLog};
pub use block::{Block, BlockHash, ChainTip, ProofKind, SubBlock};
pub use error::TypeError;
pub use hash::{digest, digest_multi, TxHash};
pub use identity::{NodeKey, PeerIdentity};
pub use keys::{PublicKey, SecretKey};
pub use network::NetworkId;
pub use state::{NodeState, NodeType};
pub use time::{Clock, SystemClock, Timestamp};
pub use transaction::Transaction;
