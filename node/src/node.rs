//! The main strand node struct: wires the transport, flow control and chain
//! coordination together and owns their background jobs.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strand_consensus::{Consensus, FaultToleranceManager, ValidatorSetConsensus};
use strand_crypto::NodeKeys;
use strand_ledger::{EventLog, GenesisConfig, Ledger, MemoryLedger};
use strand_network::{
    ConnectionPool, P2pConfig, P2pNetwork, PacketSink, PacketTransport, PeerDiscovery,
    PeerRegistry, PoolConfig, Prober, QosManager, Router, TcpProber,
};
use strand_protocol::WireMessage;
use strand_rpc::{RpcError, RpcServer, RpcServerConfig, RpcState, RpcTlsFiles, TransactionSubmitter};
use strand_types::{AuditLog, Clock, NodeType, PeerIdentity, SystemClock, Transaction, TxHash};
use strand_utils::TracingAuditLog;
use tokio::net::TcpListener;

use crate::config::NodeConfig;
use crate::coordinator::{Coordinator, CoordinatorConfig, NetworkPeers};
use crate::error::{FlowError, NodeError};
use crate::flow_control::{FlowControlManager, FlowLimits, FlowMonitor, FlushReport};
use crate::jobs::JobSet;
use crate::message_handler::InboundHandler;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;

/// Timeout for waiting on background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Load the node's secret from a hex file, creating the file with a fresh
/// key when it does not exist yet.
pub fn load_or_create_keys(path: Option<&Path>) -> Result<NodeKeys, NodeError> {
    let Some(path) = path else {
        return Ok(NodeKeys::generate());
    };
    if !path.exists() {
        let keys = NodeKeys::generate();
        std::fs::write(path, hex::encode(keys.secret().as_bytes()))?;
        tracing::info!(path = %path.display(), "generated new node key");
        return Ok(keys);
    }
    let text = std::fs::read_to_string(path)?;
    let bytes = hex::decode(text.trim())
        .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
    let secret: [u8; 32] = bytes.try_into().map_err(|_| {
        NodeError::Config(format!("{}: secret key must be 32 bytes", path.display()))
    })?;
    Ok(NodeKeys::from_secret(secret))
}

/// Hands RPC submissions to flow control and gossips accepted ones.
struct FlowSubmitter {
    flow: Arc<FlowControlManager>,
    net: Arc<P2pNetwork>,
    metrics: Arc<NodeMetrics>,
}

impl TransactionSubmitter for FlowSubmitter {
    fn submit(&self, tx: Transaction) -> Result<TxHash, RpcError> {
        match self.flow.add_transaction(tx.clone()) {
            Ok(hash) => {
                self.metrics.transactions_received.inc();
                self.metrics.pending_transactions.set(self.flow.pending_len() as i64);
                self.net.broadcast(&WireMessage::Transaction(tx));
                Ok(hash)
            }
            Err(FlowError::Backpressure { limit }) => {
                self.metrics.transactions_rejected.inc();
                Err(RpcError::Busy(format!("pending pool holds {limit} transactions")))
            }
            Err(e) => {
                self.metrics.transactions_rejected.inc();
                Err(RpcError::Rejected(e.to_string()))
            }
        }
    }
}

/// A running strand node.
pub struct StrandNode {
    pub config: NodeConfig,
    pub keys: Arc<NodeKeys>,
    pub identity: PeerIdentity,
    pub ledger: Arc<dyn Ledger>,
    pub events: Arc<EventLog>,
    pub registry: Arc<PeerRegistry>,
    pub net: Arc<P2pNetwork>,
    pub discovery: Arc<PeerDiscovery>,
    pub router: Arc<Router>,
    pub qos: Arc<QosManager>,
    pub fault: Arc<FaultToleranceManager>,
    pub flow: Arc<FlowControlManager>,
    pub coordinator: Arc<Coordinator>,
    pub metrics: Arc<NodeMetrics>,
    pub shutdown: ShutdownController,

    clock: Arc<dyn Clock>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    rpc_addr: Option<SocketAddr>,
    jobs: JobSet,
}

impl StrandNode {
    /// Build every component and bind the P2P listener. Call
    /// [`start`](Self::start) to begin accepting peers and running jobs.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let keys = Arc::new(load_or_create_keys(config.secret_key_file.as_deref())?);

        let listener = TcpListener::bind(config.listen_address()).await?;
        let local_addr = listener.local_addr()?;
        let advertised = config
            .advertise_address
            .clone()
            .unwrap_or_else(|| local_addr.to_string());
        let identity = PeerIdentity::new(config.node_id.clone(), advertised, keys.public());

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = Arc::new(EventLog::new(
            config.audit_capacity,
            Some(Arc::new(TracingAuditLog)),
        ));
        let audit: Arc<dyn AuditLog> = events.clone();

        let ledger: Arc<dyn Ledger> =
            Arc::new(MemoryLedger::from_config(&GenesisConfig::new(config.network)));
        let consensus: Arc<dyn Consensus> = if config.validators.is_empty() {
            Arc::new(ValidatorSetConsensus::permissive())
        } else {
            Arc::new(ValidatorSetConsensus::new(
                config.validators.iter().cloned(),
                config.pos_batch_limit,
            ))
        };

        let registry = Arc::new(PeerRegistry::new(config.max_peers));
        let pool = Arc::new(ConnectionPool::new(PoolConfig {
            dial_timeout: config.dial_timeout(),
            max_idle: config.max_idle(),
            max_connections: config.max_connections,
        }));
        let net = P2pNetwork::new(
            identity.clone(),
            config.node_type,
            Arc::clone(&keys),
            pool,
            Arc::clone(&registry),
            Arc::clone(&audit),
            P2pConfig {
                outbound_capacity: config.outbound_queue_capacity,
                inbound_capacity: config.inbound_queue_capacity,
                handshake_timeout: config.handshake_timeout(),
                ..P2pConfig::default()
            },
        );
        net.set_chain_tip(Some(ledger.tip()));

        let prober: Arc<dyn Prober> = Arc::new(TcpProber);
        let discovery = Arc::new(PeerDiscovery::new(
            &identity,
            config.dht_bucket_size,
            Arc::clone(&prober),
            config.probe_timeout(),
            Arc::clone(&audit),
        ));
        let transport: Arc<dyn PacketTransport> = net.clone();
        let router = Arc::new(Router::new(
            &keys,
            transport,
            Arc::clone(&prober),
            config.probe_timeout(),
            Arc::clone(&audit),
        ));
        let sink: Arc<dyn PacketSink> = router.clone();
        let qos = Arc::new(QosManager::new(
            config.qos_bandwidth_limit_kb,
            config.qos_max_queued,
            sink,
        ));
        let fault = Arc::new(FaultToleranceManager::new(
            config.quorum_threshold,
            Arc::clone(&audit),
            Arc::clone(&clock),
        ));
        let metrics = Arc::new(NodeMetrics::new());

        let flow = Arc::new(FlowControlManager::new(
            FlowLimits {
                max_pending_transactions: config.max_pending_transactions,
                max_sub_block_size: config.max_sub_block_size,
                max_block_size: config.max_block_size,
            },
            config.node_id.clone(),
            Arc::clone(&ledger),
            Arc::clone(&consensus),
            Arc::clone(&clock),
        ));
        let coordinator = Arc::new(Coordinator::new(
            identity.clone(),
            CoordinatorConfig {
                liveness_window_secs: config.liveness_window_secs,
                probe_timeout: config.probe_timeout(),
                max_peers: config.max_peers,
            },
            Arc::clone(&ledger),
            consensus,
            Arc::clone(&registry),
            Arc::clone(&fault),
            Arc::new(NetworkPeers::new(Arc::clone(&net), config.request_timeout())),
            prober,
            Arc::clone(&metrics),
            audit,
            Arc::clone(&clock),
        ));
        metrics.chain_height.set(ledger.height() as i64);

        tracing::info!(
            node = %identity.id,
            node_type = %config.node_type,
            address = %identity.address,
            public_key = %hex::encode(keys.public().as_bytes()),
            "strand node initialized"
        );

        Ok(Self {
            config,
            keys,
            identity,
            ledger,
            events,
            registry,
            net,
            discovery,
            router,
            qos,
            fault,
            flow,
            coordinator,
            metrics,
            shutdown: ShutdownController::new(),
            clock,
            listener: Some(listener),
            local_addr,
            rpc_addr: None,
            jobs: JobSet::new(),
        })
    }

    /// The address the P2P listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The RPC address, once the server is running.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_addr
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.names()
    }

    /// Start the listener, the background jobs and the RPC server, then
    /// dial the bootstrap peers.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let listener = self.listener.take().ok_or(NodeError::AlreadyStarted)?;
        tracing::info!(
            network = ?self.config.network,
            address = %self.local_addr,
            "strand node starting"
        );

        // Transport
        self.jobs.push(
            "listener",
            self.net.spawn_listener(listener, self.shutdown.subscribe()),
        );
        self.jobs
            .push("dispatcher", self.net.spawn_dispatcher(self.shutdown.subscribe()));
        self.jobs.push(
            "pool_sweeper",
            self.net.pool().spawn_sweeper(self.shutdown.subscribe()),
        );
        self.jobs.push(
            "qos_cycle",
            self.qos.spawn_cycle(
                Duration::from_millis(self.config.qos_cycle_ms),
                self.shutdown.subscribe(),
            ),
        );

        if let Some(inbound) = self.net.take_inbound() {
            let handler = Arc::new(InboundHandler::new(
                self.identity.id.clone(),
                Arc::clone(&self.flow),
                Arc::clone(&self.coordinator),
                Arc::clone(&self.ledger),
                Arc::clone(&self.router),
                Arc::clone(&self.registry),
                self.net.clone(),
                Arc::clone(&self.metrics),
                Arc::clone(&self.clock),
            ));
            self.jobs
                .push("inbound", handler.spawn(inbound, self.shutdown.subscribe()));
        }

        self.spawn_flow_monitor();
        self.spawn_liveness();
        self.spawn_route_maintenance();
        self.spawn_metrics_refresh();

        if self.config.enable_rpc {
            self.start_rpc().await?;
        }

        self.bootstrap().await;
        tracing::info!(jobs = ?self.jobs.names(), "strand node started");
        Ok(())
    }

    fn spawn_flow_monitor(&mut self) {
        let mut monitor = FlowMonitor::new(Arc::clone(&self.flow));
        let flow = Arc::clone(&self.flow);
        let coordinator = Arc::clone(&self.coordinator);
        let ledger = Arc::clone(&self.ledger);
        let net = Arc::clone(&self.net);
        let metrics = Arc::clone(&self.metrics);
        self.jobs.spawn(
            "flow_monitor",
            Duration::from_secs(self.config.monitor_interval_secs),
            self.shutdown.subscribe(),
            move || {
                let started = Instant::now();
                let outcome = monitor.tick();
                metrics
                    .flush_time_ms
                    .observe(started.elapsed().as_secs_f64() * 1000.0);
                match outcome {
                    Ok(report) => publish_flush(&report, &coordinator, &ledger, &net, &metrics),
                    Err(FlowError::EmptyPending | FlowError::EmptySubBlocks) => {}
                    Err(e) => tracing::warn!("flow monitor flush failed: {e}"),
                }
                let sizes = flow.sizes();
                metrics.pending_transactions.set(sizes.pending as i64);
                metrics.pending_sub_blocks.set(sizes.sub_blocks as i64);
                std::future::ready(())
            },
        );
    }

    fn spawn_liveness(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let registry = Arc::clone(&self.registry);
        let discovery = Arc::clone(&self.discovery);
        let router = Arc::clone(&self.router);
        let clock = Arc::clone(&self.clock);
        self.jobs.spawn(
            "liveness",
            Duration::from_secs(self.config.probe_interval_secs),
            self.shutdown.subscribe(),
            move || {
                let coordinator = Arc::clone(&coordinator);
                let registry = Arc::clone(&registry);
                let discovery = Arc::clone(&discovery);
                let router = Arc::clone(&router);
                let clock = Arc::clone(&clock);
                async move {
                    let now = clock.now();
                    for peer in registry.check_bans(now) {
                        tracing::info!(peer = %peer, "peer ban expired");
                    }
                    // Peers that dialed us are only known to the registry.
                    for identity in registry.connected() {
                        if !router.has_route(&identity.id) {
                            if let Err(e) = router.add_route(&identity.id, &identity.address) {
                                tracing::debug!(peer = %identity.id, "route not added: {e}");
                            }
                            discovery.add_node(identity, None, now).await;
                        }
                    }
                    let report = coordinator.probe_peers().await;
                    let reconnected = coordinator.reconnect_peers().await;
                    tracing::debug!(
                        alive = report.alive.len(),
                        dead = report.dead.len(),
                        quorum = report.quorum_alive,
                        reconnected,
                        "liveness round"
                    );
                }
            },
        );
    }

    fn spawn_route_maintenance(&mut self) {
        let router = Arc::clone(&self.router);
        let discovery = Arc::clone(&self.discovery);
        let clock = Arc::clone(&self.clock);
        self.jobs.spawn(
            "route_maintenance",
            Duration::from_secs(self.config.route_validation_interval_secs.max(1)),
            self.shutdown.subscribe(),
            move || {
                let router = Arc::clone(&router);
                let discovery = Arc::clone(&discovery);
                let clock = Arc::clone(&clock);
                async move {
                    let removed = router.validate_routing().await;
                    let evicted = discovery.refresh(clock.now()).await;
                    if !removed.is_empty() || !evicted.is_empty() {
                        tracing::info!(
                            routes_removed = removed.len(),
                            peers_evicted = evicted.len(),
                            "pruned unreachable peers"
                        );
                    }
                    router.broadcast_routes().await;
                }
            },
        );
    }

    fn spawn_metrics_refresh(&mut self) {
        let net = Arc::clone(&self.net);
        let registry = Arc::clone(&self.registry);
        let ledger = Arc::clone(&self.ledger);
        let fault = Arc::clone(&self.fault);
        let metrics = Arc::clone(&self.metrics);
        self.jobs.spawn(
            "metrics_refresh",
            Duration::from_secs(self.config.monitor_interval_secs),
            self.shutdown.subscribe(),
            move || {
                metrics.observe_p2p(&net.stats());
                // Fork resolution may have swapped the chain since the last tick.
                net.set_chain_tip(Some(ledger.tip()));
                metrics.peer_count.set(registry.connected_count() as i64);
                metrics.chain_height.set(ledger.height() as i64);
                metrics.quorum_alive.set(i64::from(fault.is_quorum_alive()));
                std::future::ready(())
            },
        );
    }

    async fn start_rpc(&mut self) -> Result<(), NodeError> {
        let address: SocketAddr = self
            .config
            .rpc_address()
            .parse()
            .map_err(|e| NodeError::Config(format!("rpc address: {e}")))?;
        let tls = match (
            &self.config.rpc_tls_cert,
            &self.config.rpc_tls_key,
            &self.config.rpc_tls_client_ca,
        ) {
            (Some(cert), Some(key), Some(client_ca)) => Some(RpcTlsFiles {
                cert: cert.clone(),
                key: key.clone(),
                client_ca: client_ca.clone(),
            }),
            (None, None, None) => None,
            _ => {
                return Err(NodeError::Config(
                    "rpc_tls_cert, rpc_tls_key and rpc_tls_client_ca must be set together".into(),
                ))
            }
        };
        let state = RpcState {
            ledger: Arc::clone(&self.ledger),
            submitter: Arc::new(FlowSubmitter {
                flow: Arc::clone(&self.flow),
                net: Arc::clone(&self.net),
                metrics: Arc::clone(&self.metrics),
            }),
            keys: Arc::clone(&self.keys),
            metrics: self
                .config
                .enable_metrics
                .then(|| self.metrics.registry.clone()),
        };
        let server = RpcServer::bind(
            &RpcServerConfig {
                address,
                tls,
                allow_insecure: self.config.rpc_allow_insecure,
            },
            state,
        )
        .await?;
        self.rpc_addr = Some(server.local_addr()?);

        let shutdown = self.shutdown.subscribe();
        self.jobs.push(
            "rpc",
            tokio::spawn(async move {
                if let Err(e) = server.serve(shutdown).await {
                    tracing::error!("RPC server failed: {e}");
                }
            }),
        );
        Ok(())
    }

    /// Dial each bootstrap address once. Unreachable peers are logged and
    /// left for later discovery.
    async fn bootstrap(&self) {
        for address in &self.config.bootstrap_peers {
            match self.connect_bootstrap(address).await {
                Ok(identity) => {
                    tracing::info!(peer = %identity.id, %address, "connected to bootstrap peer")
                }
                Err(e) => tracing::warn!(%address, "bootstrap peer unavailable: {e}"),
            }
        }
    }

    /// Open a session to `address` and add the peer it proves to be to the
    /// registry, the DHT and the routing table.
    pub async fn connect_bootstrap(&self, address: &str) -> Result<PeerIdentity, NodeError> {
        let identity = self.net.connect_address(address).await?;
        let node_type = self
            .registry
            .get(&identity.id)
            .map_or(NodeType::Full, |r| r.node_type);
        self.coordinator
            .establish_connection(&identity, node_type)
            .await?;
        self.discovery
            .add_node(identity.clone(), None, self.clock.now())
            .await;
        self.router.add_route(&identity.id, &identity.address)?;
        Ok(identity)
    }

    /// Start, then run until SIGINT/SIGTERM or a programmatic shutdown.
    pub async fn run_until_signal(&mut self) -> Result<(), NodeError> {
        self.start().await?;
        self.shutdown.wait_for_signal().await;
        self.stop().await
    }

    /// Signal every job, close all sessions and wait for the jobs to end.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("strand node stopping");
        self.shutdown.shutdown();
        self.net.shutdown().await;

        let jobs = std::mem::take(&mut self.jobs);
        let result = jobs.join_all(SHUTDOWN_TIMEOUT).await;
        self.metrics.observe_p2p(&self.net.stats());
        tracing::info!(
            height = self.ledger.height(),
            audit_events = self.events.total(),
            "strand node stopped"
        );
        result
    }
}

/// Send freshly cut blocks to peers and refresh the chain gauges.
fn publish_flush(
    report: &FlushReport,
    coordinator: &Coordinator,
    ledger: &Arc<dyn Ledger>,
    net: &P2pNetwork,
    metrics: &NodeMetrics,
) {
    metrics.sub_blocks_created.inc_by(report.sub_blocks as u64);
    metrics.blocks_created.inc_by(report.blocks.len() as u64);
    if report.blocks.is_empty() {
        return;
    }
    for block in &report.blocks {
        let result = coordinator.sync_block_with_peers(block);
        tracing::info!(
            index = block.index,
            hash = %block.hash,
            transactions = block.transaction_count(),
            sent = result.sent,
            failed = result.failed,
            "block created"
        );
    }
    net.set_chain_tip(Some(ledger.tip()));
    metrics.chain_height.set(ledger.height() as i64);
}
