//! Structured logging initialisation and the tracing-backed audit sink.
//!
//! Two output formats are supported:
//! - [`LogFormat::Human`] for local development.
//! - [`LogFormat::Json`] for production log aggregation.
//!
//! `RUST_LOG` overrides the caller-supplied level when set.

use serde::{Deserialize, Serialize};
use strand_types::{AuditEvent, AuditLog, Timestamp};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Selects the output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Human => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_thread_ids(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                .init();
        }
    }
}

/// Audit sink that writes each event to the `audit` tracing target.
///
/// Holds no state, so recording never contends with the caller's locks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, at: Timestamp, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            at = at.as_secs(),
            kind = event.kind(),
            event = ?event,
            "audit event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn tracing_audit_log_accepts_events_without_subscriber() {
        TracingAuditLog.record(
            Timestamp::new(1),
            AuditEvent::RouteAdded {
                peer: "peer-1".into(),
            },
        );
    }
}
