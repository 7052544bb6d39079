//! Nullable audit log that captures events in memory.

use parking_lot::Mutex;
use strand_types::{AuditEvent, AuditLog, Timestamp};

#[derive(Debug, Default)]
pub struct NullAuditLog {
    events: Mutex<Vec<(Timestamp, AuditEvent)>>,
}

impl NullAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<(Timestamp, AuditEvent)> {
        self.events.lock().clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| e.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditLog for NullAuditLog {
    fn record(&self, at: Timestamp, event: AuditEvent) {
        self.events.lock().push((at, event));
    }
}
