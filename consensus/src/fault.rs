//! Node liveness tracking and quorum computation.
//!
//! All state sits behind one mutex. Each operation takes it once, records
//! what changed, releases it, and only then emits audit events, so an audit
//! sink is free to call back into the manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_types::{AuditEvent, AuditLog, BlockHash, Clock, Timestamp};

use crate::ConsensusError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeHealth {
    pub alive: bool,
    /// Last chain tip hash this node was synced to.
    pub synced_hash: Option<BlockHash>,
    pub changed_at: Timestamp,
}

pub struct FaultToleranceManager {
    nodes: Mutex<HashMap<String, NodeHealth>>,
    quorum_threshold: usize,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl FaultToleranceManager {
    pub fn new(quorum_threshold: usize, audit: Arc<dyn AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            quorum_threshold,
            audit,
            clock,
        }
    }

    pub fn quorum_threshold(&self) -> usize {
        self.quorum_threshold
    }

    fn alive_in(nodes: &HashMap<String, NodeHealth>) -> usize {
        nodes.values().filter(|n| n.alive).count()
    }

    /// Start tracking `node` as alive. Returns `false` if already tracked.
    pub fn track(&self, node: &str) -> bool {
        if self.nodes.lock().contains_key(node) {
            return false;
        }
        self.set_alive(node, true);
        true
    }

    /// Stop tracking `node`.
    pub fn untrack(&self, node: &str) -> bool {
        let now = self.clock.now();
        let (removed, before, after) = {
            let mut nodes = self.nodes.lock();
            let before = Self::alive_in(&nodes);
            let removed = nodes.remove(node).is_some();
            (removed, before, Self::alive_in(&nodes))
        };
        self.audit_quorum(before, after, now);
        removed
    }

    /// Record a liveness observation. Returns whether the state changed.
    /// Unknown nodes are tracked from this call on.
    pub fn set_alive(&self, node: &str, alive: bool) -> bool {
        let now = self.clock.now();
        let (changed, was_known, before, after) = {
            let mut nodes = self.nodes.lock();
            let before = Self::alive_in(&nodes);
            let (changed, was_known) = match nodes.get_mut(node) {
                Some(health) if health.alive == alive => (false, true),
                Some(health) => {
                    health.alive = alive;
                    health.changed_at = now;
                    (true, true)
                }
                None => {
                    nodes.insert(
                        node.to_string(),
                        NodeHealth {
                            alive,
                            synced_hash: None,
                            changed_at: now,
                        },
                    );
                    (true, false)
                }
            };
            (changed, was_known, before, Self::alive_in(&nodes))
        };

        if changed {
            if !alive {
                tracing::warn!(node, "node failed");
                self.audit.record(now, AuditEvent::NodeFailed { node: node.to_string() });
            } else if was_known {
                tracing::info!(node, "node recovered");
                self.audit
                    .record(now, AuditEvent::NodeRecovered { node: node.to_string() });
            }
        }
        self.audit_quorum(before, after, now);
        changed
    }

    pub fn mark_failed(&self, node: &str) -> bool {
        self.set_alive(node, false)
    }

    pub fn mark_recovered(&self, node: &str) -> bool {
        self.set_alive(node, true)
    }

    fn audit_quorum(&self, before: usize, after: usize, now: Timestamp) {
        let threshold = self.quorum_threshold;
        let had = before >= threshold;
        let has = after >= threshold;
        if had && !has {
            tracing::warn!(alive = after, threshold, "quorum lost");
            self.audit
                .record(now, AuditEvent::QuorumLost { alive: after, threshold });
        } else if !had && has {
            tracing::info!(alive = after, threshold, "quorum restored");
            self.audit
                .record(now, AuditEvent::QuorumRestored { alive: after, threshold });
        }
    }

    pub fn is_alive(&self, node: &str) -> bool {
        self.nodes.lock().get(node).is_some_and(|n| n.alive)
    }

    pub fn alive_count(&self) -> usize {
        Self::alive_in(&self.nodes.lock())
    }

    /// `true` iff at least `quorum_threshold` tracked nodes are alive.
    pub fn is_quorum_alive(&self) -> bool {
        self.alive_count() >= self.quorum_threshold
    }

    /// Like [`is_quorum_alive`](Self::is_quorum_alive) but as an error value
    /// for callers that want to flag degraded operation.
    pub fn check_quorum(&self) -> Result<(), ConsensusError> {
        let alive = self.alive_count();
        if alive >= self.quorum_threshold {
            Ok(())
        } else {
            Err(ConsensusError::QuorumLost {
                alive,
                threshold: self.quorum_threshold,
            })
        }
    }

    /// Record that `node` is synced to `latest_hash`. Returns `Ok(false)` when
    /// it already was. Dead and unknown nodes are refused.
    pub fn sync_node(&self, node: &str, latest_hash: BlockHash) -> Result<bool, ConsensusError> {
        let now = self.clock.now();
        {
            let mut nodes = self.nodes.lock();
            let health = nodes
                .get_mut(node)
                .ok_or_else(|| ConsensusError::UnknownNode(node.to_string()))?;
            if !health.alive {
                return Err(ConsensusError::NodeDead(node.to_string()));
            }
            if health.synced_hash == Some(latest_hash) {
                return Ok(false);
            }
            health.synced_hash = Some(latest_hash);
        }
        tracing::debug!(node, hash = %latest_hash, "node synced");
        self.audit.record(
            now,
            AuditEvent::NodeSynced {
                node: node.to_string(),
                hash: latest_hash,
            },
        );
        Ok(true)
    }

    pub fn synced_hash(&self, node: &str) -> Option<BlockHash> {
        self.nodes.lock().get(node).and_then(|n| n.synced_hash)
    }

    pub fn health(&self, node: &str) -> Option<NodeHealth> {
        self.nodes.lock().get(node).cloned()
    }

    /// All tracked nodes, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, NodeHealth)> {
        let mut all: Vec<_> = self
            .nodes
            .lock()
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_nullables::{NullAuditLog, NullClock};

    fn manager(threshold: usize) -> (FaultToleranceManager, Arc<NullAuditLog>, Arc<NullClock>) {
        let audit = Arc::new(NullAuditLog::new());
        let clock = Arc::new(NullClock::new(1_000));
        let m = FaultToleranceManager::new(threshold, audit.clone(), clock.clone());
        (m, audit, clock)
    }

    #[test]
    fn quorum_flips_exactly_at_threshold() {
        let (m, audit, _) = manager(3);
        for n in ["a", "b", "c"] {
            m.track(n);
        }
        assert!(m.is_quorum_alive());
        assert_eq!(audit.count_kind("quorum_restored"), 1);

        m.mark_failed("c");
        assert!(!m.is_quorum_alive());
        assert_eq!(audit.count_kind("quorum_lost"), 1);
        assert_eq!(
            m.check_quorum(),
            Err(ConsensusError::QuorumLost { alive: 2, threshold: 3 })
        );

        m.mark_recovered("c");
        assert!(m.is_quorum_alive());
        assert_eq!(audit.count_kind("quorum_restored"), 2);
        assert_eq!(audit.count_kind("node_recovered"), 1);
    }

    #[test]
    fn repeated_observations_are_not_transitions() {
        let (m, audit, _) = manager(1);
        m.track("a");
        assert!(!m.set_alive("a", true));
        assert!(m.mark_failed("a"));
        assert!(!m.mark_failed("a"));
        assert_eq!(audit.count_kind("node_failed"), 1);
        assert!(!m.track("a"));
    }

    #[test]
    fn failure_timestamp_comes_from_clock() {
        let (m, _, clock) = manager(1);
        m.track("a");
        clock.advance(30);
        m.mark_failed("a");
        assert_eq!(m.health("a").unwrap().changed_at, Timestamp::new(1_030));
    }

    #[test]
    fn sync_is_idempotent_and_refuses_dead_nodes() {
        let (m, audit, _) = manager(1);
        let h = BlockHash::new([7; 32]);
        m.track("a");
        assert_eq!(m.sync_node("a", h), Ok(true));
        assert_eq!(m.sync_node("a", h), Ok(false));
        assert_eq!(m.synced_hash("a"), Some(h));
        assert_eq!(audit.count_kind("node_synced"), 1);

        m.mark_failed("a");
        assert_eq!(
            m.sync_node("a", BlockHash::new([8; 32])),
            Err(ConsensusError::NodeDead("a".into()))
        );
        assert_eq!(m.synced_hash("a"), Some(h));
        assert_eq!(
            m.sync_node("zz", h),
            Err(ConsensusError::UnknownNode("zz".into()))
        );
    }

    #[test]
    fn untracking_can_lose_quorum() {
        let (m, audit, _) = manager(2);
        m.track("a");
        m.track("b");
        assert!(m.untrack("b"));
        assert!(!m.is_quorum_alive());
        assert_eq!(audit.count_kind("quorum_lost"), 1);
        assert_eq!(m.snapshot().len(), 1);
    }

    #[test]
    fn zero_threshold_is_always_met() {
        let (m, _, _) = manager(0);
        assert!(m.is_quorum_alive());
    }
}
