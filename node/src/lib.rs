//! strand node: flow control, chain coordination and process wiring.
//!
//! The node batches transactions into sub-blocks and blocks, keeps its chain
//! in step with its peers (resolving forks by longest valid chain), tracks
//! peer liveness against a quorum threshold and runs the periodic jobs that
//! keep the transport healthy.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod flow_control;
pub mod jobs;
pub mod message_handler;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use coordinator::{
    BlockOutcome, ChainPeers, Coordinator, CoordinatorConfig, LivenessReport, NetworkPeers,
};
pub use error::{CoordinatorError, FlowError, NodeError};
pub use flow_control::{FlowControlManager, FlowLimits, FlowMonitor, FlushReport, PoolSizes};
pub use jobs::{spawn_periodic, JobSet};
pub use message_handler::{Handled, InboundHandler, ReplySink};
pub use metrics::NodeMetrics;
pub use node::{load_or_create_keys, StrandNode};
pub use shutdown::ShutdownController;
