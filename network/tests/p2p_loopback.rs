//! Two P2P networks talking over real loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use strand_network::{ConnectionPool, P2pConfig, P2pNetwork, PeerRegistry, PoolConfig};
use strand_nullables::{NullAuditLog, NullRandom};
use strand_protocol::WireMessage;
use strand_types::{Block, ChainTip, NodeType, PeerIdentity, Timestamp, Transaction};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

struct TestNode {
    net: Arc<P2pNetwork>,
    audit: Arc<NullAuditLog>,
    _shutdown: broadcast::Sender<()>,
}

async fn spawn_node(rng: &NullRandom, id: &str) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (keys, identity) = rng.identity(id, &address);
    let audit = Arc::new(NullAuditLog::new());
    let net = P2pNetwork::new(
        identity,
        NodeType::Full,
        Arc::new(keys),
        Arc::new(ConnectionPool::new(PoolConfig::default())),
        Arc::new(PeerRegistry::new(16)),
        audit.clone(),
        P2pConfig {
            handshake_timeout: Duration::from_secs(2),
            ..P2pConfig::default()
        },
    );
    let (shutdown, _) = broadcast::channel(1);
    net.spawn_listener(listener, shutdown.subscribe());
    net.spawn_dispatcher(shutdown.subscribe());
    TestNode {
        net,
        audit,
        _shutdown: shutdown,
    }
}

fn identity_of(node: &TestNode) -> PeerIdentity {
    node.net.local().clone()
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn message_travels_over_encrypted_session() {
    let rng = NullRandom::new(1);
    let a = spawn_node(&rng, "node-a").await;
    let b = spawn_node(&rng, "node-b").await;
    let mut b_inbound = b.net.take_inbound().unwrap();

    a.net.connect(&identity_of(&b)).await.unwrap();
    let tx = Transaction::new("alice", "bob", 10, 1, 0, Timestamp::new(5));
    a.net
        .send_message("node-b", WireMessage::Transaction(tx.clone()))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(3), b_inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.from, "node-a");
    assert_eq!(received.message, WireMessage::Transaction(tx));

    wait_until(|| b.net.registry().is_connected("node-a")).await;
    assert!(a.net.registry().is_connected("node-b"));
    assert_eq!(a.audit.count_kind("peer_connected"), 1);
}

#[tokio::test]
async fn request_is_answered_by_response_id() {
    let rng = NullRandom::new(2);
    let a = spawn_node(&rng, "node-a").await;
    let b = spawn_node(&rng, "node-b").await;
    let mut b_inbound = b.net.take_inbound().unwrap();

    let genesis = Block::genesis("v", Timestamp::EPOCH);
    let tip = genesis.tip();
    let responder = b.net.clone();
    tokio::spawn(async move {
        while let Some(msg) = b_inbound.recv().await {
            if let WireMessage::ChainTipRequest { request_id } = msg.message {
                let reply = WireMessage::ChainTipResponse {
                    request_id,
                    tip: Some(tip),
                };
                responder.send_message(&msg.from, reply).await.unwrap();
            }
        }
    });

    a.net.connect(&identity_of(&b)).await.unwrap();
    wait_until(|| b.net.registry().is_connected("node-a")).await;

    let response = a
        .net
        .request(
            "node-b",
            |request_id| WireMessage::ChainTipRequest { request_id },
            Duration::from_secs(3),
        )
        .await
        .unwrap();
    match response {
        WireMessage::ChainTipResponse { tip: got, .. } => {
            assert_eq!(got, Some(ChainTip { index: 0, hash: genesis.hash }));
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_reaches_every_connected_peer() {
    let rng = NullRandom::new(3);
    let hub = spawn_node(&rng, "hub").await;
    let x = spawn_node(&rng, "x").await;
    let y = spawn_node(&rng, "y").await;
    let mut x_in = x.net.take_inbound().unwrap();
    let mut y_in = y.net.take_inbound().unwrap();

    hub.net.connect(&identity_of(&x)).await.unwrap();
    hub.net.connect(&identity_of(&y)).await.unwrap();

    let block = Block::genesis("hub", Timestamp::new(9));
    let result = hub.net.broadcast_block(&block);
    assert_eq!((result.sent, result.failed), (2, 0));

    for inbound in [&mut x_in, &mut y_in] {
        let msg = tokio::time::timeout(Duration::from_secs(3), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message, WireMessage::Block(block.clone()));
    }
}

#[tokio::test]
async fn bootstrap_by_address_learns_identity() {
    let rng = NullRandom::new(4);
    let a = spawn_node(&rng, "node-a").await;
    let b = spawn_node(&rng, "node-b").await;

    let learned = a.net.connect_address(&b.net.local().address).await.unwrap();
    assert_eq!(learned, identity_of(&b));
    assert!(a.net.registry().is_connected("node-b"));
}

#[tokio::test]
async fn wrong_key_fails_handshake() {
    let rng = NullRandom::new(5);
    let a = spawn_node(&rng, "node-a").await;
    let b = spawn_node(&rng, "node-b").await;

    let mut forged = identity_of(&b);
    forged.public_key = rng.node_keys().public();
    assert!(a.net.connect(&forged).await.is_err());
    assert!(!a.net.registry().is_connected("node-b"));
}

#[tokio::test]
async fn disconnect_is_observed_by_both_sides() {
    let rng = NullRandom::new(6);
    let a = spawn_node(&rng, "node-a").await;
    let b = spawn_node(&rng, "node-b").await;

    a.net.connect(&identity_of(&b)).await.unwrap();
    wait_until(|| b.net.registry().is_connected("node-a")).await;

    assert!(a.net.disconnect("node-b").await);
    wait_until(|| !a.net.registry().is_connected("node-b")).await;
    wait_until(|| !b.net.registry().is_connected("node-a")).await;
    wait_until(|| a.audit.count_kind("peer_disconnected") == 1).await;
}

#[tokio::test]
async fn silent_peer_does_not_hold_up_other_recipients() {
    let rng = NullRandom::new(7);
    let a = spawn_node(&rng, "node-a").await;
    let b = spawn_node(&rng, "node-b").await;
    let mut b_inbound = b.net.take_inbound().unwrap();
    a.net.connect(&identity_of(&b)).await.unwrap();

    // Accepts the TCP connection but never answers the handshake.
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (_, mute) = rng.identity("mute", &silent.local_addr().unwrap().to_string());
    a.net
        .registry()
        .upsert(mute, NodeType::Full, Timestamp::now());

    let first = WireMessage::ChainTipRequest { request_id: 1 };
    let second = WireMessage::ChainTipRequest { request_id: 2 };
    a.net.send_message("mute", first).await.unwrap();
    a.net.send_message("node-b", second.clone()).await.unwrap();

    // Well under the two second handshake timeout the silent peer holds.
    let received = tokio::time::timeout(Duration::from_millis(800), b_inbound.recv())
        .await
        .expect("delivery to node-b waited on the silent peer")
        .unwrap();
    assert_eq!(received.message, second);
    drop(silent);
}
