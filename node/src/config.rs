//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use strand_types::{NetworkId, NodeType};
use strand_utils::LogFormat;

use crate::NodeError;

/// Configuration for a strand node.
///
/// Loaded from a TOML file via [`NodeConfig::from_toml_file`] or built
/// programmatically (e.g. for tests). Durations are whole milliseconds or
/// seconds as the field name says.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to join.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Identity string other peers know this node by.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default = "default_node_type")]
    pub node_type: NodeType,

    /// Interface the P2P listener binds to.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Port to listen on for P2P connections. `0` picks a free port.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Address advertised to peers. Defaults to the bound listener address.
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Bootstrap peer addresses dialled on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Hex-encoded 32-byte X25519 secret. A fresh key is generated when unset.
    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,

    // -- Queues and timeouts --------------------------------------------------
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default = "default_queue_capacity")]
    pub inbound_queue_capacity: usize,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Pooled connections idle longer than this are closed.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    // -- Flow control ---------------------------------------------------------
    #[serde(default = "default_max_pending_transactions")]
    pub max_pending_transactions: usize,

    #[serde(default = "default_max_sub_block_size")]
    pub max_sub_block_size: usize,

    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    // -- Liveness and quorum --------------------------------------------------
    /// A peer without a successful probe inside this window is dead.
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_quorum_threshold")]
    pub quorum_threshold: usize,

    /// Validators accepted by consensus. Empty admits any validator.
    #[serde(default)]
    pub validators: Vec<String>,

    /// Sub-blocks with at most this many transactions are proven by stake.
    #[serde(default = "default_pos_batch_limit")]
    pub pos_batch_limit: usize,

    // -- Discovery and routing ------------------------------------------------
    #[serde(default = "default_bucket_size")]
    pub dht_bucket_size: usize,

    #[serde(default = "default_route_validation_secs")]
    pub route_validation_interval_secs: u64,

    // -- QoS ------------------------------------------------------------------
    /// Per-cycle byte budget in KB.
    #[serde(default = "default_bandwidth_limit_kb")]
    pub qos_bandwidth_limit_kb: u64,

    #[serde(default = "default_qos_cycle_ms")]
    pub qos_cycle_ms: u64,

    #[serde(default = "default_qos_max_queued")]
    pub qos_max_queued: usize,

    // -- RPC ------------------------------------------------------------------
    #[serde(default = "default_true")]
    pub enable_rpc: bool,

    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default)]
    pub rpc_tls_cert: Option<PathBuf>,

    #[serde(default)]
    pub rpc_tls_key: Option<PathBuf>,

    /// CA that client certificates must chain to.
    #[serde(default)]
    pub rpc_tls_client_ca: Option<PathBuf>,

    /// Serve RPC over plain HTTP when no TLS paths are set. Development only.
    #[serde(default)]
    pub rpc_allow_insecure: bool,

    #[serde(default)]
    pub enable_metrics: bool,

    // -- Logging --------------------------------------------------------------
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Audit events kept in memory for inspection.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_node_id() -> String {
    "strand-node".to_string()
}

fn default_node_type() -> NodeType {
    NodeType::Full
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_p2p_port() -> u16 {
    NetworkId::Dev.default_port()
}

fn default_max_peers() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_dial_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_idle_secs() -> u64 {
    300
}

fn default_max_connections() -> usize {
    128
}

fn default_max_pending_transactions() -> usize {
    10_000
}

fn default_max_sub_block_size() -> usize {
    100
}

fn default_max_block_size() -> usize {
    10
}

fn default_monitor_interval_secs() -> u64 {
    10
}

fn default_liveness_window_secs() -> u64 {
    60
}

fn default_probe_interval_secs() -> u64 {
    15
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_quorum_threshold() -> usize {
    1
}

fn default_pos_batch_limit() -> usize {
    50
}

fn default_bucket_size() -> usize {
    strand_network::DEFAULT_BUCKET_SIZE
}

fn default_route_validation_secs() -> u64 {
    120
}

fn default_bandwidth_limit_kb() -> u64 {
    1024
}

fn default_qos_cycle_ms() -> u64 {
    1_000
}

fn default_qos_max_queued() -> usize {
    4_096
}

fn default_true() -> bool {
    true
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    7301
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_capacity() -> usize {
    1_024
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject limits that would make a component unusable.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_id.trim().is_empty() {
            return Err(NodeError::Config("node_id must not be empty".into()));
        }
        let positive = [
            ("max_pending_transactions", self.max_pending_transactions),
            ("max_sub_block_size", self.max_sub_block_size),
            ("max_block_size", self.max_block_size),
            ("outbound_queue_capacity", self.outbound_queue_capacity),
            ("inbound_queue_capacity", self.inbound_queue_capacity),
            ("dht_bucket_size", self.dht_bucket_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(NodeError::Config(format!("{name} must be greater than zero")));
        }
        if self.monitor_interval_secs == 0 || self.probe_interval_secs == 0 {
            return Err(NodeError::Config("periodic intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_host, self.port)
    }

    pub fn rpc_address(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            node_id: default_node_id(),
            node_type: default_node_type(),
            listen_host: default_listen_host(),
            port: default_p2p_port(),
            advertise_address: None,
            bootstrap_peers: Vec::new(),
            max_peers: default_max_peers(),
            secret_key_file: None,
            outbound_queue_capacity: default_queue_capacity(),
            inbound_queue_capacity: default_queue_capacity(),
            dial_timeout_ms: default_dial_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_idle_secs: default_max_idle_secs(),
            max_connections: default_max_connections(),
            max_pending_transactions: default_max_pending_transactions(),
            max_sub_block_size: default_max_sub_block_size(),
            max_block_size: default_max_block_size(),
            monitor_interval_secs: default_monitor_interval_secs(),
            liveness_window_secs: default_liveness_window_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            quorum_threshold: default_quorum_threshold(),
            validators: Vec::new(),
            pos_batch_limit: default_pos_batch_limit(),
            dht_bucket_size: default_bucket_size(),
            route_validation_interval_secs: default_route_validation_secs(),
            qos_bandwidth_limit_kb: default_bandwidth_limit_kb(),
            qos_cycle_ms: default_qos_cycle_ms(),
            qos_max_queued: default_qos_max_queued(),
            enable_rpc: default_true(),
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            rpc_tls_cert: None,
            rpc_tls_key: None,
            rpc_tls_client_ca: None,
            rpc_allow_insecure: false,
            enable_metrics: false,
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_survives_toml() {
        let config = NodeConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(NodeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_sub_block_size, 100);
        assert_eq!(config.monitor_interval_secs, 10);
        assert_eq!(config.log_format, LogFormat::Human);
        assert!(!config.rpc_allow_insecure);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            node_id = "validator-1"
            node_type = "validator"
            log_format = "json"
            max_pending_transactions = 5
            bootstrap_peers = ["10.0.0.1:27300"]
        "#;
        let config = NodeConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.node_id, "validator-1");
        assert_eq!(config.node_type, NodeType::Validator);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.max_pending_transactions, 5);
        assert_eq!(config.bootstrap_peers, vec!["10.0.0.1:27300".to_string()]);
        assert_eq!(config.max_block_size, 10);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = NodeConfig::from_toml_str("max_sub_block_size = 0").unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("max_sub_block_size")));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        assert!(NodeConfig::from_toml_str(r#"node_type = "archive""#).is_err());
    }

    #[test]
    fn missing_file_returns_config_error() {
        let err = NodeConfig::from_toml_file("/nonexistent/strand.toml").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "port = 0\nquorum_threshold = 3\n").unwrap();
        let config = NodeConfig::from_toml_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.quorum_threshold, 3);
    }
}
