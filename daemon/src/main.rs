//! strand daemon: entry point for running a strand node.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use strand_node::{NodeConfig, StrandNode};
use strand_types::{NetworkId, NodeType};
use strand_utils::LogFormat;

#[derive(Parser)]
#[command(name = "strand-daemon", about = "strand P2P node daemon")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base;
    /// CLI flags and env vars override them.
    #[arg(long, env = "STRAND_CONFIG")]
    config: Option<PathBuf>,

    /// Network to join: "live", "test" or "dev".
    #[arg(long, env = "STRAND_NETWORK")]
    network: Option<NetworkId>,

    #[arg(long, env = "STRAND_NODE_ID")]
    node_id: Option<String>,

    /// Role of this node: "validator", "full" or "light".
    #[arg(long, env = "STRAND_NODE_TYPE")]
    node_type: Option<NodeType>,

    /// Port for P2P connections (defaults to the network's port).
    #[arg(long, env = "STRAND_P2P_PORT")]
    port: Option<u16>,

    /// Bootstrap peer addresses, comma separated.
    #[arg(long, env = "STRAND_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    #[arg(long, env = "STRAND_MAX_PEERS")]
    max_peers: Option<usize>,

    /// File holding the hex-encoded node secret. Created when missing.
    #[arg(long, env = "STRAND_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Disable the RPC server.
    #[arg(long, env = "STRAND_DISABLE_RPC")]
    no_rpc: bool,

    #[arg(long, env = "STRAND_RPC_PORT")]
    rpc_port: Option<u16>,

    /// Serve RPC without TLS. Development only.
    #[arg(long, env = "STRAND_RPC_INSECURE")]
    rpc_insecure: bool,

    /// Expose Prometheus metrics on the RPC server.
    #[arg(long, env = "STRAND_ENABLE_METRICS")]
    metrics: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "STRAND_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "STRAND_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the effective configuration as TOML and exit.
    #[command(name = "config")]
    Config,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until interrupted.
    Run,
}

impl Cli {
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let path = path.to_string_lossy();
                NodeConfig::from_toml_file(&path)
                    .with_context(|| format!("loading config from {path}"))?
            }
            None => NodeConfig::default(),
        };

        if let Some(network) = self.network {
            // Follow the network's port unless one was chosen explicitly.
            if config.port == config.network.default_port() {
                config.port = network.default_port();
            }
            config.network = network;
        }
        if let Some(id) = &self.node_id {
            config.node_id = id.clone();
        }
        if let Some(node_type) = self.node_type {
            config.node_type = node_type;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers.clone();
        }
        if let Some(max) = self.max_peers {
            config.max_peers = max;
        }
        if let Some(path) = &self.key_file {
            config.secret_key_file = Some(path.clone());
        }
        if self.no_rpc {
            config.enable_rpc = false;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        config.rpc_allow_insecure |= self.rpc_insecure;
        config.enable_metrics |= self.metrics;
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Node {
            action: NodeAction::Run,
        } => {
            strand_utils::init_logging(config.log_format, &config.log_level);
            tracing::info!(
                network = config.network.as_str(),
                node_id = %config.node_id,
                node_type = %config.node_type,
                port = config.port,
                rpc = config.enable_rpc,
                "starting strand node"
            );
            if !config.bootstrap_peers.is_empty() {
                tracing::info!("bootstrap peers: {}", config.bootstrap_peers.join(", "));
            }

            let mut node = StrandNode::new(config).await?;
            node.run_until_signal().await?;
            tracing::info!("strand daemon exited cleanly");
        }
    }

    Ok(())
}
