//! The single peer registry shared by the network and the coordinator.
//!
//! Every manager that needs per-peer state reads and writes it here through
//! narrow accessors; no component keeps its own map of peers.

use std::collections::HashMap;

use parking_lot::RwLock;
use strand_types::{ChainTip, NodeState, NodeType, PeerIdentity, Timestamp};

// ---------------------------------------------------------------------------
// Penalty / scoring types
// ---------------------------------------------------------------------------

/// Reasons a peer can be penalized. Each carries a fixed penalty value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenaltyReason {
    InvalidChain,
    InvalidMessage,
    Timeout,
    ProtocolViolation,
}

impl PenaltyReason {
    /// Penalty points deducted for this reason (always negative).
    pub fn penalty(self) -> i32 {
        match self {
            Self::InvalidChain => -250,
            Self::InvalidMessage => -50,
            Self::Timeout => -10,
            Self::ProtocolViolation => -1000,
        }
    }
}

/// Score at or below which a peer is banned.
pub const BAN_THRESHOLD: i32 = -500;
/// Duration of a ban in seconds (1 hour).
pub const BAN_DURATION_SECS: u64 = 3600;
const SCORE_MIN: i32 = -1000;
const SCORE_MAX: i32 = 100;

// ---------------------------------------------------------------------------
// Peer record
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct PeerRecord {
    pub identity: PeerIdentity,
    pub node_type: NodeType,
    pub state: NodeState,
    pub connected: bool,
    pub last_seen: Timestamp,
    /// Last successful liveness probe, if any.
    pub last_probe_ok: Option<Timestamp>,
    pub chain_tip: Option<ChainTip>,
    pub score: i32,
    pub banned_until: Option<Timestamp>,
}

impl PeerRecord {
    fn new(identity: PeerIdentity, node_type: NodeType, now: Timestamp) -> Self {
        Self {
            identity,
            node_type,
            state: NodeState::Syncing,
            connected: false,
            last_seen: now,
            last_probe_ok: None,
            chain_tip: None,
            score: 0,
            banned_until: None,
        }
    }

    pub fn is_banned(&self) -> bool {
        self.banned_until.is_some()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRecord>>,
    max_peers: usize,
}

impl PeerRegistry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    // -- Lifecycle -------------------------------------------------------------

    /// Register a peer or refresh its identity and type. At capacity, the
    /// lowest-scoring disconnected peer is evicted if it scores below zero;
    /// otherwise the newcomer is refused. Banned peers stay banned.
    pub fn upsert(&self, identity: PeerIdentity, node_type: NodeType, now: Timestamp) -> bool {
        let mut peers = self.peers.write();
        if let Some(record) = peers.get_mut(&identity.id) {
            record.identity = identity;
            record.node_type = node_type;
            record.last_seen = now;
            return true;
        }

        if peers.len() >= self.max_peers {
            let worst = peers
                .iter()
                .filter(|(_, p)| !p.connected)
                .min_by_key(|(_, p)| p.score)
                .map(|(id, p)| (id.clone(), p.score));
            match worst {
                Some((id, score)) if score < 0 => {
                    tracing::debug!(evicted = %id, score, "evicted lowest-scoring peer to make room");
                    peers.remove(&id);
                }
                _ => return false,
            }
        }

        peers.insert(identity.id.clone(), PeerRecord::new(identity, node_type, now));
        true
    }

    pub fn remove(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.write().remove(peer_id)
    }

    /// Mark connected. Refused for banned peers.
    pub fn mark_connected(&self, peer_id: &str, now: Timestamp) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(peer_id) {
            Some(p) if !p.is_banned() => {
                p.connected = true;
                p.last_seen = now;
                p.state = NodeState::Active;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the peer was connected.
    pub fn mark_disconnected(&self, peer_id: &str) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(peer_id) {
            Some(p) if p.connected => {
                p.connected = false;
                p.state = NodeState::Offline;
                true
            }
            _ => false,
        }
    }

    /// Called on every inbound message.
    pub fn touch(&self, peer_id: &str, now: Timestamp) {
        if let Some(p) = self.peers.write().get_mut(peer_id) {
            p.last_seen = now;
        }
    }

    pub fn record_probe(&self, peer_id: &str, ok: bool, now: Timestamp) {
        if let Some(p) = self.peers.write().get_mut(peer_id) {
            if ok {
                p.last_probe_ok = Some(now);
                p.last_seen = now;
            }
        }
    }

    pub fn set_state(&self, peer_id: &str, state: NodeState) {
        if let Some(p) = self.peers.write().get_mut(peer_id) {
            p.state = state;
        }
    }

    pub fn set_chain_tip(&self, peer_id: &str, tip: ChainTip) {
        if let Some(p) = self.peers.write().get_mut(peer_id) {
            p.chain_tip = Some(tip);
        }
    }

    // -- Queries ---------------------------------------------------------------

    pub fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.read().get(peer_id).cloned()
    }

    pub fn identity(&self, peer_id: &str) -> Option<PeerIdentity> {
        self.peers.read().get(peer_id).map(|p| p.identity.clone())
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.peers
            .read()
            .get(peer_id)
            .is_some_and(|p| p.connected && !p.is_banned())
    }

    /// Identities of connected, non-banned peers, sorted by id.
    pub fn connected(&self) -> Vec<PeerIdentity> {
        let mut out: Vec<PeerIdentity> = self
            .peers
            .read()
            .values()
            .filter(|p| p.connected && !p.is_banned())
            .map(|p| p.identity.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|p| p.connected && !p.is_banned())
            .count()
    }

    /// Known, non-banned peers that are not connected: dial candidates.
    pub fn connectable(&self) -> Vec<PeerIdentity> {
        self.peers
            .read()
            .values()
            .filter(|p| !p.connected && !p.is_banned())
            .map(|p| p.identity.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<PeerRecord> {
        self.peers.read().values().cloned().collect()
    }

    /// Alive iff the last successful probe falls within `window_secs` of `now`.
    pub fn is_alive(&self, peer_id: &str, now: Timestamp, window_secs: u64) -> bool {
        self.peers.read().get(peer_id).is_some_and(|p| {
            p.last_probe_ok
                .is_some_and(|t| !t.is_older_than(window_secs, now))
        })
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    // -- Scoring / banning -----------------------------------------------------

    /// Penalize a peer. Returns `true` if the peer was banned as a result.
    pub fn penalize(&self, peer_id: &str, reason: PenaltyReason, now: Timestamp) -> bool {
        let mut peers = self.peers.write();
        let Some(peer) = peers.get_mut(peer_id) else {
            return false;
        };
        if peer.is_banned() {
            return false;
        }

        peer.score = (peer.score + reason.penalty()).max(SCORE_MIN);
        if peer.score > BAN_THRESHOLD {
            return false;
        }

        peer.banned_until = Some(Timestamp::new(now.as_secs().saturating_add(BAN_DURATION_SECS)));
        peer.connected = false;
        peer.state = NodeState::Offline;
        tracing::warn!(peer = peer_id, ?reason, score = peer.score, "peer banned");
        true
    }

    /// Reward a peer for good behaviour (e.g. serving a valid chain).
    pub fn reward(&self, peer_id: &str, amount: i32) {
        if let Some(p) = self.peers.write().get_mut(peer_id) {
            p.score = (p.score + amount).min(SCORE_MAX);
        }
    }

    pub fn is_banned(&self, peer_id: &str) -> bool {
        self.peers.read().get(peer_id).is_some_and(PeerRecord::is_banned)
    }

    /// Lift expired bans. Returns the ids that were unbanned.
    pub fn check_bans(&self, now: Timestamp) -> Vec<String> {
        let mut lifted = Vec::new();
        for (id, peer) in self.peers.write().iter_mut() {
            if peer.banned_until.is_some_and(|until| now >= until) {
                peer.banned_until = None;
                peer.score = 0;
                lifted.push(id.clone());
            }
        }
        lifted
    }
}
