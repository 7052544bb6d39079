//! Append-only audit trail of network and chain events.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_types::{AuditEvent, AuditLog, Timestamp};

/// Keeps the most recent `capacity` events and forwards each one to an
/// optional downstream log (typically the tracing sink).
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<(Timestamp, AuditEvent)>>,
    forward: Option<Arc<dyn AuditLog>>,
    total: Mutex<u64>,
}

impl EventLog {
    pub fn new(capacity: usize, forward: Option<Arc<dyn AuditLog>>) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            forward,
            total: Mutex::new(0),
        }
    }

    /// Retained events, oldest first.
    pub fn recent(&self) -> Vec<(Timestamp, AuditEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    /// Retained events of one kind.
    pub fn by_kind(&self, kind: &str) -> Vec<(Timestamp, AuditEvent)> {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// Events ever recorded, including those rotated out.
    pub fn total(&self) -> u64 {
        *self.total.lock()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditLog for EventLog {
    fn record(&self, at: Timestamp, event: AuditEvent) {
        {
            let mut events = self.events.lock();
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back((at, event.clone()));
        }
        *self.total.lock() += 1;
        if let Some(forward) = &self.forward {
            forward.record(at, event);
        }
    }
}
