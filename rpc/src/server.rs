//! Axum-based RPC server.
//!
//! One POST endpoint at `/` carries sealed calls; `/metrics` exposes the
//! node's prometheus registry as text when one is attached. Serving is over
//! mutually-authenticated TLS unless explicitly opted out for development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use strand_crypto::NodeKeys;
use strand_ledger::Ledger;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::error::RpcError;
use crate::handlers::{dispatch, TransactionSubmitter};
use crate::sealed::{open_request, seal_reply, SealedRequest};
use crate::tls::{load_tls, TlsPaths};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared RPC state.
#[derive(Clone)]
pub struct RpcState {
    pub ledger: Arc<dyn Ledger>,
    pub submitter: Arc<dyn TransactionSubmitter>,
    pub keys: Arc<NodeKeys>,
    pub metrics: Option<prometheus::Registry>,
}

/// Build the RPC router.
pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/", post(handle_call))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn handle_call(State(state): State<RpcState>, body: axum::body::Bytes) -> Response {
    let request: SealedRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("malformed body: {e}")),
    };
    // Without a usable client key nothing can be sealed back.
    let (client_key, call) = match open_request(&request, &state.keys) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::debug!(error = %e, "rejected rpc request");
            return bad_request(e.to_string());
        }
    };

    let reply = match dispatch(&state.ledger, &state.submitter, call) {
        Ok(result) => json!({ "result": result }),
        Err(e) => json!({ "error": e.to_object() }),
    };
    match seal_reply(&reply, &client_key) {
        Ok(sealed) => Json(sealed).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to seal rpc reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_metrics(State(state): State<RpcState>) -> Response {
    let Some(registry) = state.metrics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::warn!(error = %e, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

#[derive(Clone, Debug)]
pub struct RpcTlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub client_ca: PathBuf,
}

#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    pub address: SocketAddr,
    pub tls: Option<RpcTlsFiles>,
    /// Serve plain HTTP when no TLS files are configured.
    pub allow_insecure: bool,
}

pub struct RpcServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    app: Router,
}

impl RpcServer {
    /// Load TLS material and bind. Fails when TLS is missing and insecure
    /// serving was not allowed.
    pub async fn bind(config: &RpcServerConfig, state: RpcState) -> Result<Self, RpcError> {
        let acceptor = match (&config.tls, config.allow_insecure) {
            (Some(files), _) => {
                let tls = load_tls(&TlsPaths {
                    cert: &files.cert,
                    key: &files.key,
                    client_ca: &files.client_ca,
                })?;
                Some(TlsAcceptor::from(tls))
            }
            (None, true) => {
                tracing::warn!(addr = %config.address, "RPC serving without TLS");
                None
            }
            (None, false) => {
                return Err(RpcError::Tls(
                    "no certificate configured and insecure RPC not allowed".into(),
                ))
            }
        };
        let listener = TcpListener::bind(config.address).await?;
        Ok(Self {
            listener,
            acceptor,
            app: router(state),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown signal fires.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), RpcError> {
        let addr = self.local_addr()?;
        let Some(acceptor) = self.acceptor else {
            tracing::info!(addr = %addr, tls = false, "RPC server listening");
            return axum::serve(self.listener, self.app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await
                .map_err(RpcError::Io);
        };

        tracing::info!(addr = %addr, tls = true, "RPC server listening");
        loop {
            let (stream, remote) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "RPC accept failed");
                        continue;
                    }
                },
            };
            let acceptor = acceptor.clone();
            let app = self.app.clone();
            tokio::spawn(async move {
                let tls = match acceptor.accept(stream).await {
                    Ok(tls) => tls,
                    Err(e) => {
                        tracing::debug!(%remote, error = %e, "TLS handshake failed");
                        return;
                    }
                };
                let service = service_fn(move |req| app.clone().oneshot(req));
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .await
                {
                    tracing::debug!(%remote, error = %e, "RPC connection ended with error");
                }
            });
        }
        tracing::info!("RPC server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{GetBalanceResponse, RpcCall};
    use crate::sealed::{open_response, seal_request, SealedResponse};
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use strand_ledger::{GenesisConfig, MemoryLedger};
    use strand_types::{NetworkId, Timestamp, Transaction, TxHash};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Transaction>>,
    }

    impl TransactionSubmitter for Recorder {
        fn submit(&self, tx: Transaction) -> Result<TxHash, RpcError> {
            let hash = tx.hash();
            self.seen.lock().push(tx);
            Ok(hash)
        }
    }

    fn state(recorder: Arc<Recorder>) -> RpcState {
        let genesis = GenesisConfig::new(NetworkId::Dev).with_allocation("alice", 500);
        RpcState {
            ledger: Arc::new(MemoryLedger::from_config(&genesis)),
            submitter: recorder,
            keys: Arc::new(NodeKeys::generate()),
            metrics: None,
        }
    }

    async fn call(app: Router, node: &NodeKeys, client: &NodeKeys, call: RpcCall) -> Result<Value, Value> {
        let sealed = seal_request(&call, client, &node.public()).unwrap();
        let response = app
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&sealed).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        let sealed: SealedResponse = serde_json::from_slice(&body).unwrap();
        open_response(&sealed, client)
    }

    #[tokio::test]
    async fn balance_round_trips_through_sealing() {
        let state = state(Arc::new(Recorder::default()));
        let keys = state.keys.clone();
        let client = NodeKeys::generate();
        let result = call(
            router(state),
            &keys,
            &client,
            RpcCall::new("GetBalance", json!({ "walletAddress": "alice" })).unwrap(),
        )
        .await
        .unwrap();
        let balance: GetBalanceResponse = serde_json::from_value(result).unwrap();
        assert_eq!(balance.balance, 500);
    }

    #[tokio::test]
    async fn send_transaction_reaches_submitter() {
        let recorder = Arc::new(Recorder::default());
        let state = state(recorder.clone());
        let keys = state.keys.clone();
        let client = NodeKeys::generate();
        let tx = Transaction::new("alice", "bob", 10, 1, 0, Timestamp::new(1_700_000_000));
        let result = call(router(state), &keys, &client, RpcCall::new("SendTransaction", &tx).unwrap())
            .await
            .unwrap();
        assert!(result["confirmation"].as_str().unwrap().contains(&tx.hash().to_string()));
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn missing_block_and_unknown_method_are_error_objects() {
        let state = state(Arc::new(Recorder::default()));
        let keys = state.keys.clone();
        let client = NodeKeys::generate();
        let app = router(state);

        let err = call(app.clone(), &keys, &client, RpcCall::new("GetBlock", json!({ "index": 99 })).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err["code"], -32001);

        let err = call(app, &keys, &client, RpcCall::new("Mine", json!({})).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err["code"], -32601);
    }

    #[tokio::test]
    async fn genesis_block_is_served() {
        let state = state(Arc::new(Recorder::default()));
        let keys = state.keys.clone();
        let client = NodeKeys::generate();
        let block = call(router(state), &keys, &client, RpcCall::new("GetBlock", json!({ "index": 0 })).unwrap())
            .await
            .unwrap();
        assert_eq!(block["index"], 0);
    }

    #[tokio::test]
    async fn unsealed_body_is_bad_request() {
        let app = router(state(Arc::new(Recorder::default())));
        let response = app
            .oneshot(
                Request::post("/")
                    .body(Body::from(r#"{"method":"GetBalance"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_endpoint_requires_registry() {
        let mut with = state(Arc::new(Recorder::default()));
        let app = router(with.clone());
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let registry = prometheus::Registry::new();
        let counter = prometheus::IntCounter::new("strand_test_total", "test").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();
        with.metrics = Some(registry);
        let response = router(with)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("strand_test_total 1"));
    }

    #[tokio::test]
    async fn refuses_plain_http_unless_allowed() {
        let config = RpcServerConfig {
            address: "127.0.0.1:0".parse().unwrap(),
            tls: None,
            allow_insecure: false,
        };
        let refused = RpcServer::bind(&config, state(Arc::new(Recorder::default()))).await;
        assert!(matches!(refused, Err(RpcError::Tls(_))));

        let config = RpcServerConfig {
            allow_insecure: true,
            ..config
        };
        let server = RpcServer::bind(&config, state(Arc::new(Recorder::default())))
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.serve(rx));
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
