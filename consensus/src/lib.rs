//! Consensus collaborator for the strand node.
//!
//! Proof validation itself lives elsewhere; the networking layer only asks
//! whether a chain is acceptable, which proof family a sub-block should use
//! and whether a block may be finalized.
//!
//! ## Module overview
//!
//! - [`engine`]: the [`Consensus`] trait and a validator-set implementation.
//! - [`fault`]: node liveness tracking and quorum.
//! - [`fork_choice`]: strictly-longer-chain rule.
//! - [`fork_cache`]: memory of fork blocks already handled.
//! - [`error`]: consensus error types.

pub mod engine;
pub mod error;
pub mod fault;
pub mod fork_cache;
pub mod fork_choice;

pub use engine::{Consensus, ValidatorSetConsensus};
pub use error::ConsensusError;
pub use fault::{FaultToleranceManager, NodeHealth};
pub use fork_cache::ForkCache;
pub use fork_choice::{ForkChoice, ForkDecision};
