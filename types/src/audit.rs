//! Auditable events and the append-only log they are written to.
//!
//! Components record an event after their own state mutation has finished,
//! never while holding a lock the log implementation might need.

use serde::{Deserialize, Serialize};

use crate::{BlockHash, ChainTip, Timestamp};

/// Something that happened to the node's view of the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    PeerDiscovered { peer: String, address: String },
    PeerConnected { peer: String },
    PeerDisconnected { peer: String, reason: String },
    RouteAdded { peer: String },
    RouteRemoved { peer: String, reason: String },
    NodeFailed { node: String },
    NodeRecovered { node: String },
    NodeSynced { node: String, hash: BlockHash },
    QuorumLost { alive: usize, threshold: usize },
    QuorumRestored { alive: usize, threshold: usize },
    ForkDetected { local: ChainTip, incoming: ChainTip },
    ChainRejected { peer: String, reason: String },
    ChainReorganized { old_tip: ChainTip, new_tip: ChainTip },
}

impl AuditEvent {
    /// Short machine-readable name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerDiscovered { .. } => "peer_discovered",
            Self::PeerConnected { .. } => "peer_connected",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::RouteAdded { .. } => "route_added",
            Self::RouteRemoved { .. } => "route_removed",
            Self::NodeFailed { .. } => "node_failed",
            Self::NodeRecovered { .. } => "node_recovered",
            Self::NodeSynced { .. } => "node_synced",
            Self::QuorumLost { .. } => "quorum_lost",
            Self::QuorumRestored { .. } => "quorum_restored",
            Self::ForkDetected { .. } => "fork_detected",
            Self::ChainRejected { .. } => "chain_rejected",
            Self::ChainReorganized { .. } => "chain_reorganized",
        }
    }
}

/// Append-only sink for [`AuditEvent`]s (the ledger's event log).
pub trait AuditLog: Send + Sync {
    fn record(&self, at: Timestamp, event: AuditEvent);
}
