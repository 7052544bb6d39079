//! Distributed network coordinator: peer registration and liveness, block
//! propagation, and fork detection/resolution.
//!
//! Fork handling follows one rule: a candidate chain replaces the local one
//! only if its backward link walk validates, consensus accepts its proofs,
//! and it is strictly longer. Every other outcome leaves the local chain
//! untouched and is only logged. Resolutions run one at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use strand_consensus::{Consensus, FaultToleranceManager, ForkCache, ForkChoice, ForkDecision};
use strand_ledger::{validate_links, Ledger};
use strand_network::{
    BroadcastResult, NetworkGraph, P2pNetwork, PeerRegistry, PenaltyReason, Prober,
};
use strand_protocol::WireMessage;
use strand_types::{
    AuditEvent, AuditLog, Block, ChainTip, Clock, NodeState, NodeType, PeerIdentity,
};
use tokio::task::JoinSet;

use crate::metrics::NodeMetrics;
use crate::CoordinatorError;

/// What the coordinator needs from the network: peer sessions, chain queries
/// and broadcast.
#[async_trait]
pub trait ChainPeers: Send + Sync {
    fn connected(&self) -> Vec<PeerIdentity>;

    async fn connect(&self, peer: &PeerIdentity) -> Result<(), CoordinatorError>;

    async fn disconnect(&self, peer_id: &str) -> bool;

    async fn chain_tip(&self, peer_id: &str) -> Result<Option<ChainTip>, CoordinatorError>;

    async fn chain(&self, peer_id: &str) -> Result<Vec<Block>, CoordinatorError>;

    fn broadcast(&self, message: &WireMessage) -> BroadcastResult;
}

/// [`ChainPeers`] over the P2P network, with one timeout for every request.
pub struct NetworkPeers {
    net: Arc<P2pNetwork>,
    request_timeout: Duration,
}

impl NetworkPeers {
    pub fn new(net: Arc<P2pNetwork>, request_timeout: Duration) -> Self {
        Self {
            net,
            request_timeout,
        }
    }
}

#[async_trait]
impl ChainPeers for NetworkPeers {
    fn connected(&self) -> Vec<PeerIdentity> {
        self.net.connected_peers()
    }

    async fn connect(&self, peer: &PeerIdentity) -> Result<(), CoordinatorError> {
        Ok(self.net.connect(peer).await?)
    }

    async fn disconnect(&self, peer_id: &str) -> bool {
        self.net.disconnect(peer_id).await
    }

    async fn chain_tip(&self, peer_id: &str) -> Result<Option<ChainTip>, CoordinatorError> {
        let response = self
            .net
            .request(
                peer_id,
                |request_id| WireMessage::ChainTipRequest { request_id },
                self.request_timeout,
            )
            .await?;
        match response {
            WireMessage::ChainTipResponse { tip, .. } => Ok(tip),
            other => Err(CoordinatorError::UnexpectedResponse {
                peer: peer_id.to_string(),
                kind: other.kind(),
            }),
        }
    }

    async fn chain(&self, peer_id: &str) -> Result<Vec<Block>, CoordinatorError> {
        let response = self
            .net
            .request(
                peer_id,
                |request_id| WireMessage::ChainRequest { request_id },
                self.request_timeout,
            )
            .await?;
        match response {
            WireMessage::ChainResponse { blocks, .. } => Ok(blocks),
            other => Err(CoordinatorError::UnexpectedResponse {
                peer: peer_id.to_string(),
                kind: other.kind(),
            }),
        }
    }

    fn broadcast(&self, message: &WireMessage) -> BroadcastResult {
        self.net.broadcast(message)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CoordinatorConfig {
    pub liveness_window_secs: u64,
    pub probe_timeout: Duration,
    /// Upper bound on sessions the coordinator re-dials on its own.
    pub max_peers: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            liveness_window_secs: 60,
            probe_timeout: Duration::from_secs(2),
            max_peers: 64,
        }
    }
}

/// How an incoming block was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Appended on top of the local tip.
    Extended(ChainTip),
    /// Already in the chain, or a fork already looked at.
    Known,
    /// A fork whose resolution replaced the local chain.
    Reorganized(ChainTip),
    /// A fork that did not displace the local chain.
    Retained,
}

/// Result of one liveness round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub alive: Vec<String>,
    pub dead: Vec<String>,
    pub quorum_alive: bool,
}

pub struct Coordinator {
    local: PeerIdentity,
    config: CoordinatorConfig,
    ledger: Arc<dyn Ledger>,
    consensus: Arc<dyn Consensus>,
    registry: Arc<PeerRegistry>,
    fault: Arc<FaultToleranceManager>,
    peers: Arc<dyn ChainPeers>,
    prober: Arc<dyn Prober>,
    graph: RwLock<NetworkGraph>,
    forks: Mutex<ForkCache>,
    state: RwLock<NodeState>,
    resolving: tokio::sync::Mutex<()>,
    metrics: Arc<NodeMetrics>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: PeerIdentity,
        config: CoordinatorConfig,
        ledger: Arc<dyn Ledger>,
        consensus: Arc<dyn Consensus>,
        registry: Arc<PeerRegistry>,
        fault: Arc<FaultToleranceManager>,
        peers: Arc<dyn ChainPeers>,
        prober: Arc<dyn Prober>,
        metrics: Arc<NodeMetrics>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        fault.track(&local.id);
        let mut graph = NetworkGraph::new();
        graph.add_node(&local.id);
        Self {
            local,
            config,
            ledger,
            consensus,
            registry,
            fault,
            peers,
            prober,
            graph: RwLock::new(graph),
            forks: Mutex::new(ForkCache::new()),
            state: RwLock::new(NodeState::Active),
            resolving: tokio::sync::Mutex::new(()),
            metrics,
            audit,
            clock,
        }
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    /// Active while quorum holds, Degraded without it, Syncing during a
    /// fork resolution.
    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    fn set_state(&self, next: NodeState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::info!(from = %*state, to = %next, "node state changed");
            *state = next;
        }
    }

    pub fn fault_tolerance(&self) -> &Arc<FaultToleranceManager> {
        &self.fault
    }

    pub fn graph_snapshot(&self) -> NetworkGraph {
        self.graph.read().clone()
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Record a peer in the registry and the topology.
    /// Returns `false` if the registry is full or the peer is ourselves.
    pub fn register_node(&self, identity: PeerIdentity, node_type: NodeType) -> bool {
        if identity.id == self.local.id {
            return false;
        }
        let now = self.clock.now();
        let is_new = !self.registry.contains(&identity.id);
        if !self.registry.upsert(identity.clone(), node_type, now) {
            tracing::debug!(peer = %identity.id, "registry full, peer not registered");
            return false;
        }
        self.graph.write().add_node(&identity.id);
        if is_new {
            tracing::info!(peer = %identity.id, address = %identity.address, "node registered");
            self.audit.record(
                now,
                AuditEvent::PeerDiscovered {
                    peer: identity.id.clone(),
                    address: identity.address.clone(),
                },
            );
        }
        true
    }

    /// Register `identity` and open a session to it. The dial latency becomes
    /// the weight of our edge to it.
    pub async fn establish_connection(
        &self,
        identity: &PeerIdentity,
        node_type: NodeType,
    ) -> Result<(), CoordinatorError> {
        self.register_node(identity.clone(), node_type);
        let started = Instant::now();
        self.peers.connect(identity).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let now = self.clock.now();
        self.registry.record_probe(&identity.id, true, now);
        self.graph
            .write()
            .add_edge(&self.local.id, &identity.id, latency_ms.max(1));
        self.fault.set_alive(&identity.id, true);
        self.refresh_quorum();
        tracing::debug!(peer = %identity.id, latency_ms, "connection established");
        Ok(())
    }

    /// Close the session to `peer_id` and stop counting it toward quorum.
    pub async fn disconnect_peer(&self, peer_id: &str) -> bool {
        let closed = self.peers.disconnect(peer_id).await;
        self.registry.mark_disconnected(peer_id);
        self.graph.write().remove_edge(&self.local.id, peer_id);
        self.fault.untrack(peer_id);
        self.refresh_quorum();
        closed
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    /// Probe every registered, non-banned peer. A peer is alive iff it had a
    /// successful probe inside the liveness window.
    pub async fn probe_peers(&self) -> LivenessReport {
        let targets: Vec<PeerIdentity> = self
            .registry
            .all()
            .into_iter()
            .filter(|p| !p.is_banned())
            .map(|p| p.identity)
            .collect();

        let mut probes = JoinSet::new();
        for identity in targets {
            let prober = Arc::clone(&self.prober);
            let timeout = self.config.probe_timeout;
            probes.spawn(async move {
                let ok = prober.probe(&identity.address, timeout).await;
                (identity.id, ok)
            });
        }

        let now = self.clock.now();
        let mut report = LivenessReport::default();
        while let Some(joined) = probes.join_next().await {
            let Ok((id, ok)) = joined else { continue };
            self.registry.record_probe(&id, ok, now);
            let alive = self
                .registry
                .is_alive(&id, now, self.config.liveness_window_secs);
            self.fault.set_alive(&id, alive);
            if !alive {
                self.registry.set_state(&id, NodeState::Offline);
                report.dead.push(id);
            } else {
                if self.registry.is_connected(&id) {
                    self.registry.set_state(&id, NodeState::Active);
                }
                report.alive.push(id);
            }
        }
        report.alive.sort();
        report.dead.sort();
        report.quorum_alive = self.refresh_quorum();
        report
    }

    /// Re-dial known peers that answered their last probe but have no
    /// session, up to the peer limit.
    pub async fn reconnect_peers(&self) -> usize {
        let now = self.clock.now();
        let room = self
            .config
            .max_peers
            .saturating_sub(self.registry.connected_count());
        let candidates: Vec<PeerIdentity> = self
            .registry
            .connectable()
            .into_iter()
            .filter(|p| {
                self.registry
                    .is_alive(&p.id, now, self.config.liveness_window_secs)
            })
            .take(room)
            .collect();

        let mut connected = 0;
        for identity in candidates {
            let node_type = self
                .registry
                .get(&identity.id)
                .map_or(NodeType::Full, |r| r.node_type);
            match self.establish_connection(&identity, node_type).await {
                Ok(()) => connected += 1,
                Err(e) => tracing::debug!(peer = %identity.id, "reconnect failed: {e}"),
            }
        }
        connected
    }

    fn refresh_quorum(&self) -> bool {
        let quorum = self.fault.is_quorum_alive();
        self.metrics.quorum_alive.set(i64::from(quorum));
        self.metrics
            .peer_count
            .set(self.registry.connected_count() as i64);
        if *self.state.read() != NodeState::Syncing {
            self.set_state(if quorum {
                NodeState::Active
            } else {
                NodeState::Degraded
            });
        }
        if !quorum {
            tracing::warn!(
                alive = self.fault.alive_count(),
                threshold = self.fault.quorum_threshold(),
                "operating without quorum"
            );
        }
        quorum
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    /// Send `block` to every connected peer and record the live ones as
    /// synced to it.
    pub fn sync_block_with_peers(&self, block: &Block) -> BroadcastResult {
        let result = self.peers.broadcast(&WireMessage::Block(block.clone()));
        for peer in self.peers.connected() {
            if let Err(e) = self.fault.sync_node(&peer.id, block.hash) {
                tracing::debug!(peer = %peer.id, "not marked synced: {e}");
            }
        }
        if result.failed > 0 {
            tracing::warn!(
                index = block.index,
                sent = result.sent,
                failed = result.failed,
                "block propagation partially failed"
            );
        }
        result
    }

    // -----------------------------------------------------------------------
    // Forks
    // -----------------------------------------------------------------------

    /// `true` when `block` does not build on the local tip.
    pub fn detect_fork(&self, block: &Block) -> bool {
        block.prev_hash != self.ledger.tip().hash
    }

    /// Ask every connected chain-serving peer for its tip concurrently.
    /// Reported tips are stored in the registry.
    pub async fn collect_peer_tips(&self) -> Vec<(String, ChainTip)> {
        let mut queries = JoinSet::new();
        for peer in self.peers.connected() {
            let serves = self
                .registry
                .get(&peer.id)
                .map_or(true, |r| r.node_type.serves_chain());
            if !serves {
                continue;
            }
            let peers = Arc::clone(&self.peers);
            queries.spawn(async move {
                let tip = peers.chain_tip(&peer.id).await;
                (peer.id, tip)
            });
        }

        let mut tips = Vec::new();
        while let Some(joined) = queries.join_next().await {
            let Ok((id, result)) = joined else { continue };
            match result {
                Ok(Some(tip)) => {
                    self.registry.set_chain_tip(&id, tip);
                    tips.push((id, tip));
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(peer = %id, "chain tip query failed: {e}"),
            }
        }
        tips.sort_by(|a, b| a.0.cmp(&b.0));
        tips
    }

    /// The peer reporting the highest tip strictly above ours.
    pub async fn find_longest_chain(&self) -> Option<(String, ChainTip)> {
        let local_index = self.ledger.tip().index;
        let tips = self.collect_peer_tips().await;
        ForkChoice::best_tip(local_index, tips.iter().map(|(id, tip)| (id.as_str(), *tip)))
    }

    /// Check a candidate chain: shared genesis, every backward `prev_hash`
    /// link, and consensus acceptance of its proofs.
    pub fn validate_chain(&self, candidate: &[Block]) -> Result<(), CoordinatorError> {
        validate_links(candidate).map_err(|e| CoordinatorError::InvalidChain(e.to_string()))?;
        let local_genesis = self.ledger.block_by_index(0).map(|b| b.hash);
        if candidate.first().map(|b| b.hash) != local_genesis {
            return Err(CoordinatorError::InvalidChain("genesis mismatch".into()));
        }
        if !self.consensus.validate_chain(candidate) {
            return Err(CoordinatorError::InvalidChain(
                "proof rejected by consensus".into(),
            ));
        }
        Ok(())
    }

    /// Adopt `candidate` from `peer_id` if it validates and is strictly
    /// longer than the local chain, then announce the new tip.
    pub fn sync_with_valid_chain(
        &self,
        peer_id: &str,
        candidate: Vec<Block>,
    ) -> Result<ChainTip, CoordinatorError> {
        if let Err(e) = self.validate_chain(&candidate) {
            self.reject_chain(peer_id, &e, true);
            return Err(e);
        }

        let local_len = self.ledger.height();
        let candidate_len = candidate.len() as u64;
        if ForkChoice::decide(local_len, candidate_len) != ForkDecision::Adopt {
            let e = CoordinatorError::ChainNotLonger {
                local: local_len,
                candidate: candidate_len,
            };
            self.reject_chain(peer_id, &e, false);
            return Err(e);
        }

        let old_tip = self.ledger.tip();
        self.ledger.replace_chain(candidate)?;
        let new_tip = self.ledger.tip();
        self.forks.lock().clear();
        self.registry.reward(peer_id, 10);
        self.metrics.reorganizations.inc();
        self.metrics.chain_height.set(self.ledger.height() as i64);

        tracing::info!(
            peer = peer_id,
            old_index = old_tip.index,
            new_index = new_tip.index,
            hash = %new_tip.hash,
            "chain reorganized"
        );
        self.audit
            .record(self.clock.now(), AuditEvent::ChainReorganized { old_tip, new_tip });
        self.peers.broadcast(&WireMessage::Reorg { tip: new_tip });
        Ok(new_tip)
    }

    fn reject_chain(&self, peer_id: &str, error: &CoordinatorError, penalize: bool) {
        let now = self.clock.now();
        tracing::info!(peer = peer_id, "candidate chain rejected: {error}");
        if penalize {
            self.metrics.chains_rejected.inc();
            self.registry.penalize(peer_id, PenaltyReason::InvalidChain, now);
        }
        self.audit.record(
            now,
            AuditEvent::ChainRejected {
                peer: peer_id.to_string(),
                reason: error.to_string(),
            },
        );
    }

    /// Find the longest chain among peers and adopt it. Peers whose chain is
    /// refused are skipped in favour of the next best report.
    pub async fn resolve_fork(&self) -> Result<ChainTip, CoordinatorError> {
        let _running = self.resolving.lock().await;
        self.set_state(NodeState::Syncing);
        let result = self.resolve_locked().await;
        *self.state.write() = NodeState::Active;
        self.refresh_quorum();
        result
    }

    async fn resolve_locked(&self) -> Result<ChainTip, CoordinatorError> {
        let local_index = self.ledger.tip().index;
        let mut tips = self.collect_peer_tips().await;
        loop {
            let Some((best, tip)) =
                ForkChoice::best_tip(local_index, tips.iter().map(|(id, t)| (id.as_str(), *t)))
            else {
                return Err(CoordinatorError::NoLongerChain);
            };
            let peer = self.nearest_reporting(&tips, tip).unwrap_or(best);
            tips.retain(|(id, _)| *id != peer);

            tracing::debug!(peer = %peer, index = tip.index, "fetching candidate chain");
            let outcome = match self.peers.chain(&peer).await {
                Ok(blocks) => self.sync_with_valid_chain(&peer, blocks),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(new_tip) => return Ok(new_tip),
                Err(e) => tracing::debug!(peer = %peer, "candidate skipped: {e}"),
            }
        }
    }

    /// Of the peers reporting exactly `tip`, the one with the lightest edge
    /// from us. Peers we have no measured link to are not considered.
    fn nearest_reporting(&self, tips: &[(String, ChainTip)], tip: ChainTip) -> Option<String> {
        let ranked = self.graph.read().fanout(&self.local.id, usize::MAX);
        ranked
            .into_iter()
            .find(|id| tips.iter().any(|(peer, t)| peer == id && *t == tip))
    }

    /// Handle a block gossiped by `from`: extend the chain when it builds on
    /// our tip, otherwise treat it as a fork.
    pub async fn handle_incoming_block(
        &self,
        from: &str,
        block: Block,
    ) -> Result<BlockOutcome, CoordinatorError> {
        self.metrics.blocks_received.inc();
        if !block.hash_is_valid() {
            self.registry
                .penalize(from, PenaltyReason::InvalidMessage, self.clock.now());
            return Err(CoordinatorError::InvalidChain(format!(
                "block {} hash mismatch",
                block.index
            )));
        }
        if self.ledger.block_by_hash(&block.hash).is_some() {
            return Ok(BlockOutcome::Known);
        }
        self.registry.set_chain_tip(from, block.tip());

        let local = self.ledger.tip();
        if !self.detect_fork(&block) && block.index == local.index + 1 {
            self.consensus.finalize_block(&block)?;
            let tip = self.ledger.finalize_block(block.clone())?;
            self.metrics.chain_height.set(self.ledger.height() as i64);
            tracing::debug!(peer = from, index = tip.index, "chain extended by peer block");
            self.sync_block_with_peers(&block);
            return Ok(BlockOutcome::Extended(tip));
        }

        if !self.forks.lock().insert(block.prev_hash, block.hash) {
            return Ok(BlockOutcome::Known);
        }
        let incoming = block.tip();
        self.metrics.forks_detected.inc();
        tracing::info!(
            peer = from,
            local_index = local.index,
            incoming_index = incoming.index,
            "fork detected"
        );
        self.audit
            .record(self.clock.now(), AuditEvent::ForkDetected { local, incoming });

        if incoming.index <= local.index {
            return Ok(BlockOutcome::Retained);
        }
        match self.resolve_fork().await {
            Ok(tip) => Ok(BlockOutcome::Reorganized(tip)),
            Err(e) => {
                tracing::info!("local chain retained: {e}");
                Ok(BlockOutcome::Retained)
            }
        }
    }

    /// A peer announced a reorganization; resync if its tip is ahead of ours.
    pub async fn handle_reorg_notice(&self, from: &str, tip: ChainTip) -> Option<ChainTip> {
        self.registry.set_chain_tip(from, tip);
        if tip.index <= self.ledger.tip().index {
            return None;
        }
        match self.resolve_fork().await {
            Ok(new_tip) => Some(new_tip),
            Err(e) => {
                tracing::debug!(peer = from, "reorg notice did not change chain: {e}");
                None
            }
        }
    }
}
