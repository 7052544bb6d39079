//! Prometheus metrics for the strand node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`] that the RPC `/metrics`
//! endpoint encodes into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};
use strand_network::P2pStats;

pub struct NodeMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub transactions_received: IntCounter,
    pub transactions_rejected: IntCounter,
    pub sub_blocks_created: IntCounter,
    pub blocks_created: IntCounter,
    pub blocks_received: IntCounter,
    pub forks_detected: IntCounter,
    pub reorganizations: IntCounter,
    pub chains_rejected: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub peer_count: IntGauge,
    pub pending_transactions: IntGauge,
    pub pending_sub_blocks: IntGauge,
    pub chain_height: IntGauge,
    /// 1 while the alive-node count meets the quorum threshold.
    pub quorum_alive: IntGauge,
    /// Snapshots of the P2P counters, refreshed periodically.
    pub messages_sent: IntGauge,
    pub messages_received: IntGauge,
    pub messages_dropped: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of one flow-control flush, in milliseconds.
    pub flush_time_ms: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            register_int_counter_with_registry!(Opts::new(name, help), registry)
                .unwrap_or_else(|e| panic!("failed to register {name}: {e}"))
        };
        let gauge = |name: &str, help: &str| {
            register_int_gauge_with_registry!(Opts::new(name, help), registry)
                .unwrap_or_else(|e| panic!("failed to register {name}: {e}"))
        };

        let transactions_received = counter(
            "strand_transactions_received_total",
            "Transactions accepted into the pending pool",
        );
        let transactions_rejected = counter(
            "strand_transactions_rejected_total",
            "Transactions refused under backpressure",
        );
        let sub_blocks_created = counter("strand_sub_blocks_created_total", "Sub-blocks cut");
        let blocks_created = counter("strand_blocks_created_total", "Blocks finalized locally");
        let blocks_received = counter("strand_blocks_received_total", "Blocks received from peers");
        let forks_detected = counter("strand_forks_detected_total", "Incoming blocks that forked");
        let reorganizations = counter(
            "strand_reorganizations_total",
            "Local chain replaced by a longer valid chain",
        );
        let chains_rejected = counter(
            "strand_chains_rejected_total",
            "Candidate chains that failed validation",
        );

        let peer_count = gauge("strand_peer_count", "Connected peers");
        let pending_transactions = gauge("strand_pending_transactions", "Pending pool length");
        let pending_sub_blocks = gauge("strand_pending_sub_blocks", "Sub-block pool length");
        let chain_height = gauge("strand_chain_height", "Blocks in the local chain");
        let quorum_alive = gauge("strand_quorum_alive", "1 if quorum is alive");
        let messages_sent = gauge("strand_messages_sent", "Envelopes written to peers");
        let messages_received = gauge("strand_messages_received", "Envelopes accepted from peers");
        let messages_dropped = gauge("strand_messages_dropped", "Inbound envelopes dropped");

        let flush_time_ms = register_histogram_with_registry!(
            HistogramOpts::new("strand_flush_time_ms", "Flow-control flush time in milliseconds")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0]),
            registry
        )
        .expect("failed to register flush_time_ms histogram");

        Self {
            registry,
            transactions_received,
            transactions_rejected,
            sub_blocks_created,
            blocks_created,
            blocks_received,
            forks_detected,
            reorganizations,
            chains_rejected,
            peer_count,
            pending_transactions,
            pending_sub_blocks,
            chain_height,
            quorum_alive,
            messages_sent,
            messages_received,
            messages_dropped,
            flush_time_ms,
        }
    }

    pub fn observe_p2p(&self, stats: &P2pStats) {
        self.messages_sent.set(stats.sent as i64);
        self.messages_received.set(stats.received as i64);
        self.messages_dropped.set(stats.dropped as i64);
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
