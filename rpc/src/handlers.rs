//! RPC methods and their request/response bodies.
//!
//! Every call arrives as a sealed [`RpcCall`] and dispatches on `method`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_ledger::Ledger;
use strand_types::{Block, Transaction, TxHash};

use crate::error::RpcError;

/// Where `SendTransaction` hands transactions.
pub trait TransactionSubmitter: Send + Sync {
    fn submit(&self, tx: Transaction) -> Result<TxHash, RpcError>;
}

/// The decrypted body of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Result<Self, RpcError> {
        Ok(Self {
            method: method.into(),
            params: serde_json::to_value(params)
                .map_err(|e| RpcError::InvalidParams(e.to_string()))?,
        })
    }
}

// ── Balance ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBalanceRequest {
    pub wallet_address: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetBalanceResponse {
    pub wallet_address: String,
    pub balance: u64,
}

// ── Transaction ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct SendTransactionResponse {
    pub confirmation: String,
}

// ── Block ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct GetBlockRequest {
    pub index: u64,
}

fn params<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Server(e.to_string()))
}

/// Run one call against the node.
pub fn dispatch(
    ledger: &Arc<dyn Ledger>,
    submitter: &Arc<dyn TransactionSubmitter>,
    call: RpcCall,
) -> Result<Value, RpcError> {
    tracing::debug!(method = %call.method, "rpc call");
    match call.method.as_str() {
        "GetBalance" => {
            let req: GetBalanceRequest = params(call.params)?;
            let balance = ledger.balance(&req.wallet_address);
            to_value(GetBalanceResponse {
                wallet_address: req.wallet_address,
                balance,
            })
        }
        "SendTransaction" => {
            let tx: Transaction = params(call.params)?;
            let hash = submitter.submit(tx)?;
            to_value(SendTransactionResponse {
                confirmation: format!("transaction {hash} accepted"),
            })
        }
        "GetBlock" => {
            let req: GetBlockRequest = params(call.params)?;
            let block: Block = ledger
                .block_by_index(req.index)
                .ok_or(RpcError::BlockNotFound(req.index))?;
            to_value(block)
        }
        other => Err(RpcError::UnknownMethod(other.to_string())),
    }
}
