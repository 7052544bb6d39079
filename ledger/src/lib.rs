//! Ledger collaborator for the strand node.
//!
//! The networking layer only reads the chain, appends finalized blocks and
//! swaps the whole chain after a fork is resolved. [`Ledger`] is that narrow
//! surface; [`MemoryLedger`] keeps the chain in memory behind an atomically
//! swapped snapshot. [`EventLog`] is the append-only audit trail.

pub mod chain;
pub mod error;
pub mod event_log;
pub mod genesis;
pub mod ledger;
pub mod memory;

pub use chain::{common_ancestor, validate_links, MAX_CHAIN_WALK};
pub use error::LedgerError;
pub use event_log::EventLog;
pub use genesis::{create_genesis_block, genesis_hash, GenesisConfig, GENESIS_ACCOUNT};
pub use ledger::{Ledger, LedgerSummary};
pub use memory::MemoryLedger;
