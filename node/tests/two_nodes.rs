//! Two real nodes on loopback: bootstrap handshake, block propagation and
//! the RPC endpoint.

use std::time::Duration;

use serde_json::{json, Value};
use strand_ledger::Ledger;
use strand_node::{NodeConfig, StrandNode};
use strand_rpc::{open_response, seal_request, RpcCall, SealedResponse};
use strand_types::{NodeType, Timestamp, Transaction};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn config(id: &str) -> NodeConfig {
    NodeConfig {
        node_id: id.to_string(),
        node_type: NodeType::Validator,
        listen_host: "127.0.0.1".into(),
        port: 0,
        enable_rpc: false,
        dial_timeout_ms: 2_000,
        handshake_timeout_ms: 2_000,
        request_timeout_ms: 2_000,
        monitor_interval_secs: 3_600,
        ..NodeConfig::default()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bootstrap_then_block_propagates() {
    let mut alpha = StrandNode::new(config("alpha")).await.unwrap();
    alpha.start().await.unwrap();

    let mut beta_config = config("beta");
    beta_config.bootstrap_peers = vec![alpha.local_addr().to_string()];
    let mut beta = StrandNode::new(beta_config).await.unwrap();
    beta.start().await.unwrap();

    assert!(beta.registry.is_connected("alpha"));
    eventually("alpha to see beta", || alpha.registry.is_connected("beta")).await;
    assert_eq!(
        beta.registry.get("alpha").unwrap().node_type,
        NodeType::Validator
    );

    for nonce in 0..3 {
        alpha
            .flow
            .add_transaction(Transaction::new("a", "b", 1, 0, nonce, Timestamp::new(1_000)))
            .unwrap();
    }
    let report = alpha.flow.flush(true).unwrap();
    assert_eq!(report.blocks.len(), 1);
    let result = alpha.coordinator.sync_block_with_peers(&report.blocks[0]);
    assert_eq!(result.sent, 1);

    eventually("beta to extend its chain", || beta.ledger.height() == 2).await;
    assert_eq!(beta.ledger.tip(), alpha.ledger.tip());

    beta.stop().await.unwrap();
    alpha.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn node_refuses_plain_rpc_by_default() {
    let mut cfg = config("gamma");
    cfg.enable_rpc = true;
    cfg.rpc_port = 0;
    let mut node = StrandNode::new(cfg).await.unwrap();
    assert!(node.start().await.is_err());
    node.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sealed_rpc_call_over_http() {
    let mut cfg = config("delta");
    cfg.enable_rpc = true;
    cfg.rpc_port = 0;
    cfg.rpc_allow_insecure = true;
    let mut node = StrandNode::new(cfg).await.unwrap();
    node.start().await.unwrap();
    let addr = node.rpc_addr().unwrap();

    let client = strand_crypto::NodeKeys::generate();
    let call = RpcCall::new("GetBlock", json!({ "index": 0 })).unwrap();
    let body = serde_json::to_vec(&seal_request(&call, &client, &node.keys.public()).unwrap()).unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST / HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();

    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"), "{text}");
    let (_, payload) = text.split_once("\r\n\r\n").unwrap();
    let sealed: SealedResponse = serde_json::from_str(payload).unwrap();
    let block: Value = open_response(&sealed, &client).unwrap();
    assert_eq!(block["index"], 0);
    assert_eq!(block["hash"], json!(node.ledger.tip().hash));

    node.stop().await.unwrap();
}
