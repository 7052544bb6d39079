//! Time formatting helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use strand_types::Timestamp;

/// Render a timestamp as RFC 3339 in UTC, second precision.
pub fn to_rfc3339(ts: Timestamp) -> String {
    let secs = i64::try_from(ts.as_secs()).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 string. Times before the epoch are rejected.
pub fn from_rfc3339(s: &str) -> Option<Timestamp> {
    let dt = DateTime::parse_from_rfc3339(s).ok()?;
    u64::try_from(dt.timestamp()).ok().map(Timestamp::new)
}
