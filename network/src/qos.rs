//! Priority queues drained under a per-cycle byte budget.
//!
//! Priority 0 is highest. Each cycle walks the levels in ascending order and
//! sends head-of-queue packets until the next one would exceed the budget.
//! A packet leaves its queue only after the sink accepted it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::NetworkError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub destination: String,
    pub priority: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(destination: impl Into<String>, priority: u8, payload: Vec<u8>) -> Self {
        Self {
            destination: destination.into(),
            priority,
            payload,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Where dispatched packets go.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_packet(&self, packet: &Packet) -> Result<(), NetworkError>;
}

/// Outcome of one [`QosManager::process_packets`] cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sent: usize,
    pub bytes: usize,
    pub failed: usize,
    /// Packets still queued when the cycle ended.
    pub remaining: usize,
}

struct Queued {
    seq: u64,
    packet: Packet,
}

#[derive(Default)]
struct Queues {
    levels: BTreeMap<u8, VecDeque<Queued>>,
    next_seq: u64,
    len: usize,
}

pub struct QosManager {
    queues: Mutex<Queues>,
    /// Per-cycle budget in bytes.
    budget_bytes: usize,
    max_queued: usize,
    sink: Arc<dyn PacketSink>,
    cycle: tokio::sync::Mutex<()>,
}

impl QosManager {
    /// `bandwidth_limit_kb` is the per-cycle budget in KiB.
    pub fn new(bandwidth_limit_kb: u64, max_queued: usize, sink: Arc<dyn PacketSink>) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            budget_bytes: (bandwidth_limit_kb as usize).saturating_mul(1024),
            max_queued,
            sink,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn enqueue(&self, packet: Packet) -> Result<(), NetworkError> {
        let mut q = self.queues.lock();
        if q.len >= self.max_queued {
            return Err(NetworkError::QueueFull("qos"));
        }
        let seq = q.next_seq;
        q.next_seq += 1;
        q.len += 1;
        q.levels
            .entry(packet.priority)
            .or_default()
            .push_back(Queued { seq, packet });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queued_at(&self, priority: u8) -> usize {
        self.queues
            .lock()
            .levels
            .get(&priority)
            .map_or(0, VecDeque::len)
    }

    fn head(&self, priority: u8) -> Option<(u64, Packet)> {
        self.queues
            .lock()
            .levels
            .get(&priority)?
            .front()
            .map(|q| (q.seq, q.packet.clone()))
    }

    fn pop_if_head(&self, priority: u8, seq: u64) {
        let mut q = self.queues.lock();
        let popped = q
            .levels
            .get_mut(&priority)
            .filter(|level| level.front().is_some_and(|h| h.seq == seq))
            .and_then(VecDeque::pop_front)
            .is_some();
        if popped {
            q.len -= 1;
        }
    }

    /// Run one dispatch cycle. A packet larger than the whole budget is sent
    /// alone as the first packet of a cycle so it cannot block its queue
    /// forever. A failed send leaves the packet at the head of its queue and
    /// moves on to the next priority level.
    pub async fn process_packets(&self) -> CycleReport {
        let _cycle = self.cycle.lock().await;
        let mut report = CycleReport::default();
        let priorities: Vec<u8> = self.queues.lock().levels.keys().copied().collect();

        'levels: for priority in priorities {
            while let Some((seq, packet)) = self.head(priority) {
                let size = packet.size();
                let over_budget = report.bytes + size > self.budget_bytes;
                if over_budget && report.sent > 0 {
                    break 'levels;
                }
                match self.sink.send_packet(&packet).await {
                    Ok(()) => {
                        self.pop_if_head(priority, seq);
                        report.sent += 1;
                        report.bytes += size;
                        if over_budget {
                            break 'levels;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            destination = %packet.destination,
                            priority,
                            "packet send failed, will retry next cycle: {e}"
                        );
                        report.failed += 1;
                        continue 'levels;
                    }
                }
            }
        }

        report.remaining = self.len();
        report
    }

    /// Run [`process_packets`](Self::process_packets) every `period` until shutdown.
    pub fn spawn_cycle(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let qos = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if qos.is_empty() {
                            continue;
                        }
                        let report = qos.process_packets().await;
                        tracing::trace!(
                            sent = report.sent,
                            bytes = report.bytes,
                            remaining = report.remaining,
                            "qos cycle"
                        );
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}
