//! Broadcast bookkeeping.

/// Outcome of a broadcast attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of peers the message was queued or delivered for.
    pub sent: usize,
    /// Number of peers for which it failed (queue full, no route, closed).
    pub failed: usize,
}

impl BroadcastResult {
    pub fn record(&mut self, ok: bool) {
        if ok {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }
}
