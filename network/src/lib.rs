//! Peer-to-peer transport for the strand node.
//!
//! Pooled TCP connections carry authenticated, encrypted sessions. On top of
//! them sit Kademlia-style peer discovery, a peer registry with misbehaviour
//! scoring, an encrypted routing table and priority-queued packet delivery.

pub mod broadcast;
pub mod connection;
pub mod dedup;
pub mod dht;
pub mod error;
pub mod graph;
pub mod p2p;
pub mod pool;
pub mod probe;
pub mod qos;
pub mod registry;
pub mod router;

pub use broadcast::BroadcastResult;
pub use connection::{Connection, PeerSession};
pub use dedup::MessageDedup;
pub use dht::{AddOutcome, KademliaNode, PeerDiscovery, RoutingTable, DEFAULT_BUCKET_SIZE};
pub use error::NetworkError;
pub use graph::NetworkGraph;
pub use p2p::{InboundMessage, P2pConfig, P2pNetwork, P2pStats};
pub use pool::{ConnectionPool, PoolConfig};
pub use probe::{NullProber, Prober, TcpProber};
pub use qos::{CycleReport, Packet, PacketSink, QosManager};
pub use registry::{PeerRecord, PeerRegistry, PenaltyReason, BAN_DURATION_SECS, BAN_THRESHOLD};
pub use router::{PacketTransport, Router};
