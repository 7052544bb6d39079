//! Application-layer sealing of RPC bodies.
//!
//! Requests carry the caller's textual public key and a base64 sealed box
//! addressed to the node; responses are sealed back to that key. The helpers
//! here cover both ends so clients and tests share one codec.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_crypto::{decode_public_key, encode_public_key, open, seal, NodeKeys};
use strand_types::PublicKey;

use crate::error::RpcError;
use crate::handlers::RpcCall;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedRequest {
    pub client_key: String,
    pub payload: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedResponse {
    pub payload: String,
}

fn seal_json<T: Serialize>(value: &T, to: &PublicKey) -> Result<String, RpcError> {
    let bytes = serde_json::to_vec(value).map_err(|e| RpcError::Server(e.to_string()))?;
    Ok(STANDARD.encode(seal(&bytes, to)?))
}

fn open_json<T: for<'de> Deserialize<'de>>(payload: &str, keys: &NodeKeys) -> Result<T, RpcError> {
    let sealed = STANDARD
        .decode(payload)
        .map_err(|e| RpcError::InvalidRequest(format!("payload is not base64: {e}")))?;
    let plain = open(&sealed, keys)?;
    serde_json::from_slice(&plain).map_err(|e| RpcError::InvalidRequest(e.to_string()))
}

// ── Client side ──────────────────────────────────────────────────────────

pub fn seal_request(
    call: &RpcCall,
    client: &NodeKeys,
    node_key: &PublicKey,
) -> Result<SealedRequest, RpcError> {
    Ok(SealedRequest {
        client_key: client.public_text(),
        payload: seal_json(call, node_key)?,
    })
}

/// Open a response and split it into its result or error object.
pub fn open_response(response: &SealedResponse, client: &NodeKeys) -> Result<Value, Value> {
    let mut body: Value = open_json(&response.payload, client).map_err(|e| e.to_object())?;
    match body.get_mut("error").map(Value::take) {
        Some(error) => Err(error),
        None => Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
    }
}

// ── Server side ──────────────────────────────────────────────────────────

/// Recover the caller's key and call from a request.
pub fn open_request(request: &SealedRequest, node: &NodeKeys) -> Result<(PublicKey, RpcCall), RpcError> {
    let client_key = decode_public_key(&request.client_key)
        .map_err(|e| RpcError::InvalidRequest(format!("client_key: {e}")))?;
    let call = open_json(&request.payload, node)?;
    Ok((client_key, call))
}

pub fn seal_reply(reply: &Value, client_key: &PublicKey) -> Result<SealedResponse, RpcError> {
    Ok(SealedResponse {
        payload: seal_json(reply, client_key)?,
    })
}

/// The text form of the node's key that clients seal requests to.
pub fn node_key_text(node: &NodeKeys) -> String {
    encode_public_key(&node.public())
}
