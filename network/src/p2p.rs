//! Encrypted peer sessions over the connection pool.
//!
//! Outbound messages are sealed into envelopes at enqueue time and drained by
//! a single dispatcher task that routes them to one writer task per peer. A
//! writer dials and handshakes on its own, so an unreachable peer only delays
//! its own queue, and messages to one peer leave in the order they were
//! queued. Each session gets a receive loop that decrypts, deduplicates
//! and opens inbound envelopes, completing pending requests or forwarding the
//! message to the inbound channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use strand_crypto::NodeKeys;
use strand_protocol::codec::{decode_session_frame, encode_session_frame, read_frame};
use strand_protocol::handshake::{self, SessionHello};
use strand_protocol::{Envelope, ProtocolError, WireMessage};
use strand_types::{AuditEvent, AuditLog, Block, ChainTip, NodeType, PeerIdentity, PublicKey, Timestamp};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broadcast::BroadcastResult;
use crate::connection::{Connection, PeerSession};
use crate::dedup::MessageDedup;
use crate::pool::ConnectionPool;
use crate::registry::{PeerRegistry, PenaltyReason};
use crate::router::PacketTransport;
use crate::NetworkError;

#[derive(Clone, Debug)]
pub struct P2pConfig {
    pub outbound_capacity: usize,
    /// Envelopes buffered per peer while its writer dials or sends.
    pub peer_queue_capacity: usize,
    pub inbound_capacity: usize,
    pub handshake_timeout: Duration,
    pub dedup_capacity: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
            peer_queue_capacity: 256,
            inbound_capacity: 1024,
            handshake_timeout: Duration::from_secs(10),
            dedup_capacity: crate::dedup::DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// A decrypted message from an authenticated peer.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub from: String,
    pub message: WireMessage,
    pub received_at: Timestamp,
}

struct Outbound {
    recipient: PeerIdentity,
    envelope: Envelope,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct P2pStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub send_failures: u64,
}

type PendingMap = HashMap<u64, (String, oneshot::Sender<WireMessage>)>;

pub struct P2pNetwork {
    local: PeerIdentity,
    node_type: NodeType,
    keys: Arc<NodeKeys>,
    pool: Arc<ConnectionPool>,
    registry: Arc<PeerRegistry>,
    audit: Arc<dyn AuditLog>,
    config: P2pConfig,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    pending: Mutex<PendingMap>,
    next_request_id: AtomicU64,
    dedup: Mutex<MessageDedup>,
    chain_tip: RwLock<Option<ChainTip>>,
    counters: Counters,
}

impl P2pNetwork {
    pub fn new(
        local: PeerIdentity,
        node_type: NodeType,
        keys: Arc<NodeKeys>,
        pool: Arc<ConnectionPool>,
        registry: Arc<PeerRegistry>,
        audit: Arc<dyn AuditLog>,
        config: P2pConfig,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        Arc::new(Self {
            local,
            node_type,
            keys,
            pool,
            registry,
            audit,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            dedup: Mutex::new(MessageDedup::new(config.dedup_capacity)),
            chain_tip: RwLock::new(None),
            counters: Counters::default(),
            config,
        })
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Tip advertised in session hellos.
    pub fn set_chain_tip(&self, tip: Option<ChainTip>) {
        *self.chain_tip.write() = tip;
    }

    /// The inbound receiver. Only the first caller gets it.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }

    pub fn stats(&self) -> P2pStats {
        P2pStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }

    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.registry.connected()
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    fn seal_for(&self, recipient_id: &str, message: &WireMessage) -> Result<Outbound, NetworkError> {
        let recipient = self
            .registry
            .identity(recipient_id)
            .ok_or_else(|| NetworkError::PeerNotFound(recipient_id.to_string()))?;
        if self.registry.is_banned(recipient_id) {
            return Err(NetworkError::PeerBanned(recipient_id.to_string()));
        }
        let envelope = Envelope::seal(&self.local.id, &recipient, message, Timestamp::now())?;
        Ok(Outbound { recipient, envelope })
    }

    /// Queue `message` for `recipient_id`, waiting for queue capacity.
    pub async fn send_message(
        &self,
        recipient_id: &str,
        message: WireMessage,
    ) -> Result<(), NetworkError> {
        let item = self.seal_for(recipient_id, &message)?;
        self.outbound_tx
            .send(item)
            .await
            .map_err(|_| NetworkError::ChannelClosed("outbound"))
    }

    /// Queue `message` without waiting; fails with `QueueFull` under backpressure.
    pub fn try_send_message(
        &self,
        recipient_id: &str,
        message: &WireMessage,
    ) -> Result<(), NetworkError> {
        let item = self.seal_for(recipient_id, message)?;
        self.outbound_tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetworkError::QueueFull("outbound"),
            mpsc::error::TrySendError::Closed(_) => NetworkError::ChannelClosed("outbound"),
        })
    }

    fn broadcast_to(&self, targets: &[PeerIdentity], message: &WireMessage) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        for peer in targets {
            let outcome = self.try_send_message(&peer.id, message);
            if let Err(e) = &outcome {
                tracing::debug!(peer = %peer.id, kind = message.kind(), "broadcast skipped peer: {e}");
            }
            result.record(outcome.is_ok());
        }
        result
    }

    /// Queue `message` for every connected peer. Individual failures are
    /// counted, not returned.
    pub fn broadcast(&self, message: &WireMessage) -> BroadcastResult {
        let result = self.broadcast_to(&self.registry.connected(), message);
        tracing::debug!(
            kind = message.kind(),
            sent = result.sent,
            failed = result.failed,
            "broadcast"
        );
        result
    }

    pub fn broadcast_block(&self, block: &Block) -> BroadcastResult {
        self.broadcast(&WireMessage::Block(block.clone()))
    }

    /// Send a request built from a fresh request id and wait for the
    /// response carrying that id from the same peer.
    pub async fn request<F>(
        &self,
        peer_id: &str,
        build: F,
        timeout: Duration,
    ) -> Result<WireMessage, NetworkError>
    where
        F: FnOnce(u64) -> WireMessage,
    {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(request_id, (peer_id.to_string(), tx));

        if let Err(e) = self.send_message(peer_id, build(request_id)).await {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(NetworkError::ChannelClosed("response")),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(NetworkError::Timeout(format!("request {request_id} to {peer_id}")))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Drain the outbound queue until shutdown, handing each envelope to its
    /// recipient's writer. There is one dispatcher per network; a second call
    /// returns a task that exits immediately.
    pub fn spawn_dispatcher(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let net = Arc::clone(self);
        tokio::spawn(async move {
            let rx = net.outbound_rx.lock().take();
            let Some(mut rx) = rx else {
                tracing::warn!("outbound dispatcher already running");
                return;
            };
            let mut writers: HashMap<String, mpsc::Sender<Outbound>> = HashMap::new();
            loop {
                let item = tokio::select! {
                    item = rx.recv() => item,
                    _ = shutdown.recv() => None,
                };
                let Some(item) = item else { break };
                net.route(&mut writers, item, &shutdown);
            }
            tracing::debug!("outbound dispatcher stopped");
        })
    }

    fn route(
        self: &Arc<Self>,
        writers: &mut HashMap<String, mpsc::Sender<Outbound>>,
        item: Outbound,
        shutdown: &broadcast::Receiver<()>,
    ) {
        let peer_id = item.recipient.id.clone();
        let item = match writers.get(&peer_id) {
            Some(writer) => match writer.try_send(item) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer_id, "peer queue full, dropped outbound message");
                    return;
                }
                // The writer exited; start a fresh one below.
                Err(mpsc::error::TrySendError::Closed(item)) => item,
            },
            None => item,
        };

        let (tx, rx) = mpsc::channel(self.config.peer_queue_capacity.max(1));
        if tx.try_send(item).is_err() {
            return;
        }
        self.spawn_writer(peer_id.clone(), rx, shutdown.resubscribe());
        writers.insert(peer_id, tx);
    }

    /// Deliver one peer's envelopes in order, establishing the session on
    /// first use and again after a failed send.
    fn spawn_writer(
        self: &Arc<Self>,
        peer_id: String,
        mut rx: mpsc::Receiver<Outbound>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let net = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    item = rx.recv() => item,
                    _ = shutdown.recv() => None,
                };
                let Some(item) = item else { break };
                let delivered = tokio::select! {
                    result = net.deliver_envelope(&item.recipient, &item.envelope) => result,
                    _ = shutdown.recv() => break,
                };
                match delivered {
                    Ok(()) => {
                        net.counters.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        net.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(peer = %peer_id, "outbound send failed: {e}");
                    }
                }
            }
            tracing::trace!(peer = %peer_id, "peer writer stopped");
        });
    }

    async fn deliver_envelope(
        self: &Arc<Self>,
        recipient: &PeerIdentity,
        envelope: &Envelope,
    ) -> Result<(), NetworkError> {
        let conn = self.ensure_session(recipient).await?;
        let session = conn
            .session()
            .ok_or_else(|| NetworkError::ConnectionClosed(recipient.id.clone()))?;
        let frame = encode_session_frame(envelope, &session.key)?;
        match conn.send_frame(&frame).await {
            Ok(()) => {
                self.pool.release(&recipient.id, conn).await;
                Ok(())
            }
            Err(e) => {
                self.pool.remove_if(&recipient.id, conn.id()).await;
                conn.close().await;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Register `peer` and make sure an authenticated session to it exists.
    pub async fn connect(self: &Arc<Self>, peer: &PeerIdentity) -> Result<(), NetworkError> {
        if peer.id == self.local.id {
            return Err(NetworkError::Protocol(ProtocolError::HandshakeFailed(
                "refusing to connect to self".into(),
            )));
        }
        if self.registry.is_banned(&peer.id) {
            return Err(NetworkError::PeerBanned(peer.id.clone()));
        }
        if !self.registry.contains(&peer.id) {
            self.registry
                .upsert(peer.clone(), NodeType::Full, Timestamp::now());
        }
        self.ensure_session(peer).await.map(|_| ())
    }

    /// Dial an address whose identity is not known yet (bootstrap peers).
    /// Returns the identity the peer proved during the handshake.
    pub async fn connect_address(self: &Arc<Self>, address: &str) -> Result<PeerIdentity, NetworkError> {
        let stream = tokio::time::timeout(self.pool.config().dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| NetworkError::Timeout(format!("dial {address}")))?
            .map_err(|e| NetworkError::Dial {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        let session = self.run_initiator(&mut reader, &mut writer, None).await?;
        let identity = session.identity.clone();
        self.check_remote(&identity)?;

        let conn = Arc::new(Connection::with_session(
            self.pool.allocate_id(),
            address,
            reader,
            writer,
            session,
        ));
        self.install(conn, false).await;
        Ok(identity)
    }

    /// Close the session to `peer_id`. Its receive loop records the disconnect.
    pub async fn disconnect(&self, peer_id: &str) -> bool {
        let closed = self.pool.remove(peer_id).await;
        if closed {
            tracing::info!(peer = peer_id, "disconnected peer");
        }
        closed
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
    }

    async fn ensure_session(self: &Arc<Self>, peer: &PeerIdentity) -> Result<Arc<Connection>, NetworkError> {
        let conn = self.pool.acquire(&peer.id, &peer.address).await?;
        let init = conn
            .get_or_init_session(|| self.initiate_session(&conn, peer))
            .await
            .map(|_| ());
        match init {
            Ok(()) => {
                self.start_session(Arc::clone(&conn)).await;
                Ok(conn)
            }
            Err(e) => {
                self.pool.remove_if(&peer.id, conn.id()).await;
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn initiate_session(
        &self,
        conn: &Connection,
        peer: &PeerIdentity,
    ) -> Result<PeerSession, NetworkError> {
        let (mut reader, mut writer) = conn.lock_halves().await;
        let reader = reader
            .as_mut()
            .ok_or_else(|| NetworkError::ConnectionClosed(peer.id.clone()))?;
        let session = self
            .run_initiator(reader, &mut *writer, Some(&peer.public_key))
            .await?;
        if session.identity.id != peer.id {
            return Err(NetworkError::Protocol(ProtocolError::HandshakeFailed(format!(
                "expected {} but peer identified as {}",
                peer.id, session.identity.id
            ))));
        }
        conn.touch();
        Ok(session)
    }

    fn hello(&self) -> SessionHello {
        SessionHello::new(self.local.clone(), self.node_type, *self.chain_tip.read())
    }

    async fn run_initiator<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        expected: Option<&PublicKey>,
    ) -> Result<PeerSession, NetworkError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let timeout = self.config.handshake_timeout;
        let session = handshake::initiate(reader, writer, &self.keys, expected, timeout).await?;
        handshake::send_hello(writer, &session, &self.hello()).await?;
        let theirs = handshake::recv_hello(reader, &session, timeout).await?;
        Ok(PeerSession {
            identity: theirs.identity,
            node_type: theirs.node_type,
            key: session.key,
            chain_tip: theirs.chain_tip,
        })
    }

    async fn run_responder<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<PeerSession, NetworkError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let timeout = self.config.handshake_timeout;
        let session = handshake::respond(reader, writer, &self.keys, timeout).await?;
        let theirs = handshake::recv_hello(reader, &session, timeout).await?;
        handshake::send_hello(writer, &session, &self.hello()).await?;
        Ok(PeerSession {
            identity: theirs.identity,
            node_type: theirs.node_type,
            key: session.key,
            chain_tip: theirs.chain_tip,
        })
    }

    fn check_remote(&self, identity: &PeerIdentity) -> Result<(), NetworkError> {
        if identity.id == self.local.id {
            return Err(NetworkError::Protocol(ProtocolError::HandshakeFailed(
                "peer claims our identity".into(),
            )));
        }
        if self.registry.is_banned(&identity.id) {
            return Err(NetworkError::PeerBanned(identity.id.clone()));
        }
        Ok(())
    }

    /// Pool a connection whose handshake completed outside the pool. On a
    /// duplicate session the one dialed by the lower peer id survives.
    async fn install(self: &Arc<Self>, conn: Arc<Connection>, replace: bool) -> Arc<Connection> {
        let kept = self.pool.insert(Arc::clone(&conn), replace).await;
        if kept.id() == conn.id() {
            self.start_session(conn).await;
        }
        kept
    }

    /// Record the session and spawn its receive loop, once per connection.
    async fn start_session(self: &Arc<Self>, conn: Arc<Connection>) {
        let Some(reader) = conn.take_reader().await else {
            return;
        };
        let Some(session) = conn.session() else {
            return;
        };
        let now = Timestamp::now();
        let peer_id = session.identity.id.clone();
        self.registry
            .upsert(session.identity.clone(), session.node_type, now);
        if let Some(tip) = session.chain_tip {
            self.registry.set_chain_tip(&peer_id, tip);
        }
        if self.registry.mark_connected(&peer_id, now) {
            self.audit
                .record(now, AuditEvent::PeerConnected { peer: peer_id.clone() });
        }
        tracing::info!(peer = %peer_id, address = conn.address(), conn = conn.id(), "session established");

        let net = Arc::clone(self);
        tokio::spawn(async move { net.receive_loop(conn, reader).await });
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Accept inbound sessions until shutdown.
    pub fn spawn_listener(
        self: &Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let net = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            let net = Arc::clone(&net);
                            tokio::spawn(async move {
                                if let Err(e) = net.accept_inbound(stream, remote).await {
                                    tracing::debug!(%remote, "inbound session rejected: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::warn!("accept failed: {e}"),
                    },
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!("listener stopped");
        })
    }

    async fn accept_inbound(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr) -> Result<(), NetworkError> {
        let max = self.pool.config().max_connections;
        let live = self.pool.len().await;
        if live >= max {
            return Err(NetworkError::PoolFull(live));
        }
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        let session = self.run_responder(&mut reader, &mut writer).await?;
        self.check_remote(&session.identity)?;

        let replace = session.identity.id < self.local.id;
        let address = session.identity.address.clone();
        tracing::debug!(peer = %session.identity.id, %remote, "inbound handshake complete");
        let conn = Arc::new(Connection::with_session(
            self.pool.allocate_id(),
            address,
            reader,
            writer,
            session,
        ));
        self.install(conn, replace).await;
        Ok(())
    }

    async fn receive_loop(self: Arc<Self>, conn: Arc<Connection>, mut reader: OwnedReadHalf) {
        let peer_id = conn.peer_id().to_string();
        let reason = match conn.session() {
            Some(session) => loop {
                let frame = tokio::select! {
                    frame = read_frame(&mut reader) => frame,
                    _ = conn.closed() => break "closed locally".to_string(),
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => break e.to_string(),
                };
                conn.touch();
                self.registry.touch(&peer_id, Timestamp::now());
                if let Err(e) = self.handle_frame(&peer_id, session, &frame).await {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(peer = %peer_id, "dropped inbound frame: {e}");
                    if let NetworkError::ChannelClosed(_) = e {
                        break e.to_string();
                    }
                    if let NetworkError::Protocol(ProtocolError::Integrity(_)) = e {
                        self.registry
                            .penalize(&peer_id, PenaltyReason::InvalidMessage, Timestamp::now());
                    }
                }
            },
            None => "no session".to_string(),
        };
        drop(reader);

        self.pool.remove_if(&peer_id, conn.id()).await;
        conn.close().await;
        if !self.pool.contains(&peer_id).await && self.registry.mark_disconnected(&peer_id) {
            tracing::info!(peer = %peer_id, %reason, "session ended");
            self.audit.record(
                Timestamp::now(),
                AuditEvent::PeerDisconnected {
                    peer: peer_id,
                    reason,
                },
            );
        }
    }

    async fn handle_frame(
        &self,
        peer_id: &str,
        session: &PeerSession,
        frame: &[u8],
    ) -> Result<(), NetworkError> {
        let envelope = decode_session_frame(frame, &session.key)?;
        if envelope.sender != peer_id {
            return Err(ProtocolError::Integrity(format!(
                "envelope sender {} on session with {peer_id}",
                envelope.sender
            ))
            .into());
        }
        if envelope.recipient != self.local.id {
            return Err(ProtocolError::Integrity(format!(
                "envelope addressed to {}",
                envelope.recipient
            ))
            .into());
        }
        envelope.verify_integrity()?;
        if self.dedup.lock().is_duplicate_envelope(&envelope.hash) {
            tracing::trace!(peer = peer_id, "duplicate envelope");
            return Ok(());
        }
        let message = envelope.open(&self.keys)?;
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if let Some(id) = message.response_id() {
            let waiter = {
                let mut pending = self.pending.lock();
                match pending.get(&id) {
                    Some((expected, _)) if expected == peer_id => pending.remove(&id),
                    _ => None,
                }
            };
            if let Some((_, tx)) = waiter {
                let _ = tx.send(message);
                return Ok(());
            }
        }

        let inbound = InboundMessage {
            from: peer_id.to_string(),
            message,
            received_at: Timestamp::now(),
        };
        self.inbound_tx
            .send(inbound)
            .await
            .map_err(|_| NetworkError::ChannelClosed("inbound"))
    }
}

#[async_trait]
impl PacketTransport for P2pNetwork {
    async fn deliver(
        &self,
        peer_id: &str,
        address: &str,
        message: WireMessage,
    ) -> Result<(), NetworkError> {
        let mut item = self.seal_for(peer_id, &message)?;
        item.recipient.address = address.to_string();
        self.outbound_tx
            .send(item)
            .await
            .map_err(|_| NetworkError::ChannelClosed("outbound"))
    }

    fn broadcast_targets(&self) -> Vec<String> {
        self.registry
            .connected()
            .into_iter()
            .map(|p| p.id)
            .collect()
    }
}
