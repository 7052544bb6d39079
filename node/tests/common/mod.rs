//! Shared fixtures for the node integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use strand_consensus::{FaultToleranceManager, ValidatorSetConsensus};
use strand_ledger::{GenesisConfig, Ledger, MemoryLedger};
use strand_network::{BroadcastResult, NetworkError, NullProber, PacketTransport, PeerRegistry};
use strand_node::{ChainPeers, Coordinator, CoordinatorConfig, CoordinatorError, NodeMetrics};
use strand_nullables::{NullAuditLog, NullClock, NullRandom};
use strand_protocol::WireMessage;
use strand_types::{Block, BlockHash, NetworkId, NodeType, PeerIdentity, Timestamp};

/// In-memory peers, each serving a fixed chain.
#[derive(Default)]
pub struct FakePeers {
    connected: Mutex<Vec<PeerIdentity>>,
    chains: Mutex<HashMap<String, Vec<Block>>>,
    broadcasts: Mutex<Vec<WireMessage>>,
}

impl FakePeers {
    pub fn add_peer(&self, identity: PeerIdentity, chain: Vec<Block>) {
        self.chains.lock().insert(identity.id.clone(), chain);
        self.connected.lock().push(identity);
    }

    pub fn broadcasts(&self) -> Vec<WireMessage> {
        self.broadcasts.lock().clone()
    }
}

#[async_trait]
impl ChainPeers for FakePeers {
    fn connected(&self) -> Vec<PeerIdentity> {
        self.connected.lock().clone()
    }

    async fn connect(&self, peer: &PeerIdentity) -> Result<(), CoordinatorError> {
        let mut connected = self.connected.lock();
        if !connected.iter().any(|p| p.id == peer.id) {
            connected.push(peer.clone());
        }
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) -> bool {
        let mut connected = self.connected.lock();
        let before = connected.len();
        connected.retain(|p| p.id != peer_id);
        connected.len() != before
    }

    async fn chain_tip(&self, peer_id: &str) -> Result<Option<strand_types::ChainTip>, CoordinatorError> {
        self.chains
            .lock()
            .get(peer_id)
            .map(|chain| chain.last().map(Block::tip))
            .ok_or_else(|| NetworkError::PeerNotFound(peer_id.to_string()).into())
    }

    async fn chain(&self, peer_id: &str) -> Result<Vec<Block>, CoordinatorError> {
        self.chains
            .lock()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| NetworkError::PeerNotFound(peer_id.to_string()).into())
    }

    fn broadcast(&self, message: &WireMessage) -> BroadcastResult {
        self.broadcasts.lock().push(message.clone());
        BroadcastResult {
            sent: self.connected.lock().len(),
            failed: 0,
        }
    }
}

/// Transport that records deliveries instead of sending them.
#[derive(Default)]
pub struct RecordingTransport {
    pub delivered: Mutex<Vec<(String, WireMessage)>>,
}

#[async_trait]
impl PacketTransport for RecordingTransport {
    async fn deliver(&self, peer_id: &str, _address: &str, message: WireMessage) -> Result<(), NetworkError> {
        self.delivered.lock().push((peer_id.to_string(), message));
        Ok(())
    }

    fn broadcast_targets(&self) -> Vec<String> {
        Vec::new()
    }
}

/// `count` empty blocks by `validator` on top of `chain`.
pub fn extend(chain: &[Block], count: u64, validator: &str) -> Vec<Block> {
    let mut blocks = chain.to_vec();
    for _ in 0..count {
        let (index, prev) = blocks
            .last()
            .map_or((0, BlockHash::ZERO), |b| (b.index + 1, b.hash));
        blocks.push(Block::new(index, prev, validator, Vec::new(), Timestamp::new(1_000 + index)));
    }
    blocks
}

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub registry: Arc<PeerRegistry>,
    pub fault: Arc<FaultToleranceManager>,
    pub peers: Arc<FakePeers>,
    pub prober: Arc<NullProber>,
    pub audit: Arc<NullAuditLog>,
    pub metrics: Arc<NodeMetrics>,
    pub clock: Arc<NullClock>,
    pub random: NullRandom,
    pub coordinator: Arc<Coordinator>,
}

impl Harness {
    pub fn new(quorum_threshold: usize) -> Self {
        let ledger = Arc::new(MemoryLedger::from_config(&GenesisConfig::new(NetworkId::Dev)));
        let registry = Arc::new(PeerRegistry::new(32));
        let audit = Arc::new(NullAuditLog::new());
        let clock = Arc::new(NullClock::new(10_000));
        let fault = Arc::new(FaultToleranceManager::new(
            quorum_threshold,
            audit.clone(),
            clock.clone(),
        ));
        let peers = Arc::new(FakePeers::default());
        let prober = Arc::new(NullProber::new());
        let metrics = Arc::new(NodeMetrics::new());
        let random = NullRandom::new(7);
        let (_, local) = random.identity("local", "127.0.0.1:7300");
        let coordinator = Arc::new(Coordinator::new(
            local,
            CoordinatorConfig {
                liveness_window_secs: 60,
                probe_timeout: Duration::from_millis(10),
                max_peers: 8,
            },
            ledger.clone(),
            Arc::new(ValidatorSetConsensus::permissive()),
            registry.clone(),
            fault.clone(),
            peers.clone(),
            prober.clone(),
            metrics.clone(),
            audit.clone(),
            clock.clone(),
        ));
        Self {
            ledger,
            registry,
            fault,
            peers,
            prober,
            audit,
            metrics,
            clock,
            random,
            coordinator,
        }
    }

    /// The local genesis block on its own, ready to be extended.
    pub fn genesis(&self) -> Vec<Block> {
        self.ledger.chain()[..1].to_vec()
    }

    /// Replace the local chain with `count` blocks on top of genesis.
    pub fn grow_local(&self, count: u64) -> Vec<Block> {
        let chain = extend(&self.genesis(), count, "local");
        self.ledger.replace_chain(chain.clone()).unwrap();
        chain
    }

    /// Register and connect a peer serving `chain`.
    pub fn add_peer(&self, id: &str, chain: Vec<Block>) -> PeerIdentity {
        let (_, identity) = self.random.identity(id, &format!("{id}.peers.test:7300"));
        self.coordinator.register_node(identity.clone(), NodeType::Full);
        self.peers.add_peer(identity.clone(), chain);
        identity
    }

    pub fn score(&self, id: &str) -> i32 {
        self.registry.get(id).map_or(0, |r| r.score)
    }
}
