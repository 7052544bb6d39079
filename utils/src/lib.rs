//! Shared utilities for strand.

pub mod logging;
pub mod time;

pub use logging::{init_logging, LogFormat, TracingAuditLog};
pub use time::{from_rfc3339, to_rfc3339};
