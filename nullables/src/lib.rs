//! Nullable infrastructure for deterministic testing.
//!
//! Each type here stands in for a piece of infrastructure the node touches
//! (wall clock, audit log, key generation) and can be driven from a test:
//! time only moves when told to, audit events are captured for assertions,
//! and keys come from a seed.

pub mod audit;
pub mod clock;
pub mod random;

pub use audit::NullAuditLog;
pub use clock::NullClock;
pub use random::NullRandom;
