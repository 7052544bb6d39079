//! Inbound message handling.
//!
//! The P2P layer hands every decrypted, deduplicated message to
//! [`InboundHandler::handle`], which routes it to flow control, the
//! coordinator or the router, and answers chain queries.

use std::sync::Arc;

use async_trait::async_trait;
use strand_ledger::Ledger;
use strand_network::{InboundMessage, NetworkError, P2pNetwork, PeerRegistry, PenaltyReason, Router};
use strand_protocol::WireMessage;
use strand_types::Clock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::coordinator::Coordinator;
use crate::flow_control::FlowControlManager;
use crate::metrics::NodeMetrics;
use crate::FlowError;

/// Where answers to peer queries go.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, peer_id: &str, message: WireMessage) -> Result<(), NetworkError>;
}

#[async_trait]
impl ReplySink for P2pNetwork {
    async fn reply(&self, peer_id: &str, message: WireMessage) -> Result<(), NetworkError> {
        self.send_message(peer_id, message).await
    }
}

/// What happened to one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handled {
    Accepted,
    Answered,
    Rejected,
    Ignored,
}

pub struct InboundHandler {
    local_id: String,
    flow: Arc<FlowControlManager>,
    coordinator: Arc<Coordinator>,
    ledger: Arc<dyn Ledger>,
    router: Arc<Router>,
    registry: Arc<PeerRegistry>,
    replies: Arc<dyn ReplySink>,
    metrics: Arc<NodeMetrics>,
    clock: Arc<dyn Clock>,
}

impl InboundHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: impl Into<String>,
        flow: Arc<FlowControlManager>,
        coordinator: Arc<Coordinator>,
        ledger: Arc<dyn Ledger>,
        router: Arc<Router>,
        registry: Arc<PeerRegistry>,
        replies: Arc<dyn ReplySink>,
        metrics: Arc<NodeMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            flow,
            coordinator,
            ledger,
            router,
            registry,
            replies,
            metrics,
            clock,
        }
    }

    pub async fn handle(&self, inbound: InboundMessage) -> Handled {
        let InboundMessage { from, message, .. } = inbound;
        let kind = message.kind();
        tracing::trace!(peer = %from, kind, "inbound message");

        match message {
            WireMessage::Transaction(tx) => match self.flow.add_transaction(tx) {
                Ok(_) => {
                    self.metrics.transactions_received.inc();
                    self.metrics.pending_transactions.set(self.flow.pending_len() as i64);
                    Handled::Accepted
                }
                Err(FlowError::Backpressure { limit }) => {
                    self.metrics.transactions_rejected.inc();
                    tracing::debug!(peer = %from, limit, "dropping gossiped transaction under backpressure");
                    Handled::Rejected
                }
                Err(e) => {
                    self.metrics.transactions_rejected.inc();
                    tracing::debug!(peer = %from, "transaction refused: {e}");
                    Handled::Rejected
                }
            },
            WireMessage::Block(block) => {
                match self.coordinator.handle_incoming_block(&from, block).await {
                    Ok(outcome) => {
                        tracing::debug!(peer = %from, ?outcome, "peer block handled");
                        Handled::Accepted
                    }
                    Err(e) => {
                        tracing::info!(peer = %from, "peer block refused: {e}");
                        Handled::Rejected
                    }
                }
            }
            WireMessage::ChainTipRequest { request_id } => {
                let tip = Some(self.ledger.tip());
                self.answer(&from, WireMessage::ChainTipResponse { request_id, tip })
                    .await
            }
            WireMessage::ChainRequest { request_id } => {
                let blocks = self.ledger.chain().as_ref().clone();
                self.answer(&from, WireMessage::ChainResponse { request_id, blocks })
                    .await
            }
            WireMessage::Reorg { tip } => {
                match self.coordinator.handle_reorg_notice(&from, tip).await {
                    Some(new_tip) => {
                        tracing::info!(peer = %from, index = new_tip.index, "resynced after reorg notice");
                        Handled::Accepted
                    }
                    None => Handled::Ignored,
                }
            }
            WireMessage::RouteTable(table) => {
                if !table.verify() {
                    self.registry
                        .penalize(&from, PenaltyReason::InvalidMessage, self.clock.now());
                    return Handled::Rejected;
                }
                let added = self.router.merge_routes(&from, &table, &self.local_id);
                if added > 0 {
                    tracing::debug!(peer = %from, added, "learned routes");
                }
                Handled::Accepted
            }
            WireMessage::Packet { priority, data } => {
                tracing::trace!(peer = %from, priority, bytes = data.len(), "packet delivered");
                Handled::Accepted
            }
            WireMessage::ChainTipResponse { request_id, .. }
            | WireMessage::ChainResponse { request_id, .. } => {
                tracing::debug!(peer = %from, request_id, kind, "unsolicited response");
                Handled::Ignored
            }
        }
    }

    async fn answer(&self, peer: &str, message: WireMessage) -> Handled {
        match self.replies.reply(peer, message).await {
            Ok(()) => Handled::Answered,
            Err(e) => {
                tracing::debug!(peer, "reply failed: {e}");
                Handled::Ignored
            }
        }
    }

    /// Drain `inbound` until it closes or shutdown fires.
    pub fn spawn(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = inbound.recv() => message,
                    _ = shutdown.recv() => None,
                };
                let Some(message) = message else { break };
                // Blocks may trigger fork resolution, which waits on peer
                // answers; keep serving chain queries meanwhile.
                if matches!(message.message, WireMessage::Block(_) | WireMessage::Reorg { .. }) {
                    let handler = Arc::clone(&self);
                    tokio::spawn(async move {
                        handler.handle(message).await;
                    });
                } else {
                    self.handle(message).await;
                }
            }
            tracing::debug!("inbound handler stopped");
        })
    }
}
